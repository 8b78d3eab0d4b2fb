//! Cluster scoped RBAC objects. Cluster roles are shared by every workspace and never
//! deleted; cluster role bindings cannot be owned by a namespaced workspace, so the
//! finalizer releases them.
use super::{ChildMeta, parse};
use crate::Result;
use common::names::{CODEWIND_CLUSTER_ROLE, ODO_CLUSTER_ROLE, TEKTON_CLUSTER_ROLE, VERSION};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use serde_json::{Value, json};

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> Value {
    json!({ "apiGroups": groups, "resources": resources, "verbs": verbs })
}

fn cluster_role(name: &str, rules: Vec<Value>) -> Result<ClusterRole> {
    parse(
        name,
        json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {
                "name": name,
                "labels": { "app": "codewind", "codewindVersion": VERSION },
            },
            "rules": rules,
        }),
    )
}

/// Permissions of the workspace service account inside its namespace
pub fn codewind_cluster_role() -> Result<ClusterRole> {
    let mut scc = rule(&["security.openshift.io"], &["securitycontextconstraints"], &["use"]);
    scc["resourceNames"] = json!(["privileged", "anyuid"]);
    cluster_role(CODEWIND_CLUSTER_ROLE, vec![
        scc,
        rule(
            &["extensions", ""],
            &["ingresses", "ingresses/status", "podsecuritypolicies"],
            &["delete", "create", "patch", "get", "list", "update", "watch", "use"],
        ),
        rule(&[""], &["namespaces"], &["delete", "create", "patch", "get", "list"]),
        rule(
            &[""],
            &["pods", "pods/portforward", "pods/log", "pods/exec"],
            &["get", "list", "create", "delete", "watch"],
        ),
        rule(
            &[""],
            &["secrets"],
            &["get", "list", "create", "watch", "delete", "patch", "update"],
        ),
        rule(&[""], &["serviceaccounts"], &["get", "patch"]),
        rule(&[""], &["services"], &["get", "list", "create", "delete", "patch"]),
        rule(
            &[""],
            &["configmaps"],
            &["get", "list", "create", "update", "delete", "patch"],
        ),
        rule(
            &[""],
            &[
                "persistentvolumeclaims",
                "persistentvolumeclaims/finalizers",
                "persistentvolumeclaims/status",
            ],
            &["*"],
        ),
        rule(&["icp.ibm.com"], &["images"], &["get", "list", "create", "watch"]),
        rule(
            &["apps", "extensions"],
            &["deployments", "deployments/finalizers"],
            &["watch", "get", "list", "create", "update", "delete", "patch"],
        ),
        rule(
            &["extensions", "apps"],
            &["replicasets", "replicasets/finalizers"],
            &["get", "list", "update", "delete"],
        ),
        rule(
            &["rbac.authorization.k8s.io"],
            &["rolebindings", "roles", "clusterroles"],
            &["create", "get", "patch", "list"],
        ),
        rule(&[""], &["events"], &["create", "patch", "update"]),
        rule(
            &["route.openshift.io"],
            &["routes", "routes/custom-host"],
            &["get", "list", "create", "delete", "watch", "patch", "update"],
        ),
    ])
}

/// Tekton dashboard lookups across namespaces
pub fn tekton_cluster_role() -> Result<ClusterRole> {
    cluster_role(TEKTON_CLUSTER_ROLE, vec![rule(&[""], &["services"], &["get", "list"])])
}

/// Resources odo builds on OpenShift
pub fn odo_cluster_role() -> Result<ClusterRole> {
    cluster_role(ODO_CLUSTER_ROLE, vec![
        rule(
            &["apps.openshift.io"],
            &["deploymentconfigs"],
            &["get", "list", "create", "delete", "watch", "patch", "update"],
        ),
        rule(
            &["image.openshift.io"],
            &["imagestreams", "imagestreamtags"],
            &["get", "list", "create", "delete", "watch", "patch", "update"],
        ),
        rule(
            &["build.openshift.io"],
            &["buildconfigs", "builds", "buildconfigs/instantiatebinary"],
            &["get", "list", "create", "delete", "watch", "patch", "update"],
        ),
    ])
}

fn subjects(service_account: &str, namespace: &str) -> Value {
    json!([{ "kind": "ServiceAccount", "name": service_account, "namespace": namespace }])
}

fn role_ref(role: &str) -> Value {
    json!({ "apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": role })
}

/// Namespaced binding of the workspace service account to the shared codewind role
pub fn role_binding(meta: &ChildMeta, name: &str, service_account: &str) -> Result<RoleBinding> {
    parse(
        name,
        json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "RoleBinding",
            "metadata": meta.metadata(name),
            "subjects": subjects(service_account, &meta.namespace),
            "roleRef": role_ref(CODEWIND_CLUSTER_ROLE),
        }),
    )
}

/// Cluster wide binding, carries the workspace labels but no owner
pub fn cluster_role_binding(meta: &ChildMeta, name: &str, role: &str, service_account: &str) -> Result<ClusterRoleBinding> {
    parse(
        name,
        json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": { "name": name, "labels": meta.labels },
            "subjects": subjects(service_account, &meta.namespace),
            "roleRef": role_ref(role),
        }),
    )
}
