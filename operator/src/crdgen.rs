use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [controller::Codewind::crd(), controller::Keycloak::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
