use std::env;
use std::fs;
use std::path::Path;

const EXTENSION: &str = "tizen_time_util";

const OPS: &[&str] = &[
    // TZDate
    "op_time_util_tzdate_create",
    "op_time_util_tzdate_fields",
    "op_time_util_tzdate_set_field",
    "op_time_util_tzdate_to_timezone",
    "op_time_util_tzdate_to_local_timezone",
    "op_time_util_tzdate_to_utc",
    "op_time_util_tzdate_difference",
    "op_time_util_tzdate_add_duration",
    "op_time_util_tzdate_format",
    "op_time_util_tzdate_zone_info",
    "op_time_util_tzdate_dst_transition",
    // TimeDuration
    "op_time_util_duration_difference",
    // TimeUtil
    "op_time_util_get_current_date_time",
    "op_time_util_get_local_timezone",
    "op_time_util_get_available_timezones",
    "op_time_util_get_date_format",
    "op_time_util_get_time_format",
    "op_time_util_is_leap_year",
    "op_time_util_set_change_listener",
    "op_time_util_unset_change_listener",
    "op_time_util_change_next",
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
