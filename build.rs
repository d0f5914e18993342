use chrono::Utc;

/// Stamp the binary with its build time, reported by `/api/health` / 写入构建时间
fn main() {
    let stamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    println!("cargo:rustc-env=BUILD_TIME={}", stamp);
    println!("cargo:rerun-if-changed=build.rs");
}
