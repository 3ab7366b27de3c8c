use windows_exe_info::manifest;
use windows_exe_info::versioninfo::VersionInfo;

fn main() {
    let target = std::env::var("TARGET").unwrap();

    // Raw device handles need an elevated token, so ask for it up front
    if target.contains("windows") {
        manifest("resources/windd.manifest");
        VersionInfo::from_cargo_env().link().unwrap();
    }
    println!("cargo::rerun-if-changed=build.rs");
    println!("cargo::rerun-if-changed=resources/windd.manifest");
}
