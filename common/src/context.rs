use kube::runtime::events::Reporter;

fn get_prog_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()?
        .to_str()?
        .to_owned()
        .into()
}

/// User agent and event reporter name of this process
pub fn get_client_name() -> String {
    match get_prog_name() {
        Some(p) if p == "operator" => "operator.codewind.eclipse.org".to_string(),
        _ => "codewind.eclipse.org".to_string(),
    }
}

pub fn get_short_name() -> String {
    let long = get_client_name();
    let lst = long.split('.').collect::<Vec<&str>>();
    if lst.len() > 3 {
        format!("{}-{}", lst[1], lst[0])
    } else {
        "codewind".to_string()
    }
}

pub fn get_reporter(pod_name: &str) -> Reporter {
    Reporter {
        controller: get_short_name(),
        instance: Some(pod_name.to_string()),
    }
}
