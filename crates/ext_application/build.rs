use std::env;
use std::fs;
use std::path::Path;

const EXTENSION: &str = "tizen_application";

const OPS: &[&str] = &[
    // Launch and kill
    "op_application_launch",
    "op_application_kill",
    "op_application_launch_app_control",
    "op_application_app_control_reply",
    // Queries
    "op_application_find_app_control",
    "op_application_get_apps_context",
    "op_application_get_apps_info",
    "op_application_get_current_application",
    "op_application_get_app_context",
    "op_application_get_app_info",
    "op_application_get_app_certs",
    "op_application_get_app_shared_uri",
    "op_application_get_app_meta_data",
    "op_application_get_install_size",
    // Current application
    "op_application_exit",
    "op_application_hide",
    "op_application_get_requested_app_control",
    "op_application_reply_result",
    "op_application_reply_failure",
    // Events
    "op_application_add_app_info_event_listener",
    "op_application_app_info_event_next",
    "op_application_remove_app_info_event_listener",
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let out_path = Path::new(&out_dir);

    println!("cargo:rerun-if-changed=js/init.js");
    let js_code = fs::read_to_string("js/init.js").expect("Failed to read js/init.js");

    let entry = format!("ext:{}/init.js", EXTENSION);
    let extension_rs = format!(
        r#"deno_core::extension!(
    {},
    ops = [
        {},
    ],
    esm_entry_point = "{}",
    esm = ["{}" = {{ source = {:?} }}]
);"#,
        EXTENSION,
        OPS.join(",\n        "),
        entry,
        entry,
        js_code
    );

    fs::write(out_path.join("extension.rs"), extension_rs).expect("Failed to write extension.rs");
}
