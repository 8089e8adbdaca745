fn main() {
    // ── macOS: embed Info.plist for CoreBluetooth ─────────────────────────────
    //
    // A bare CLI binary has no app bundle, so CBCentralManager stays
    // "unauthorised" and every scan is a silent no-op.  Linking the plist into
    // the __TEXT,__info_plist section gives the binary the
    // NSBluetoothAlwaysUsageDescription key it needs.
    //
    // CARGO_CFG_TARGET_OS is the target, not the host, so cross builds work.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
            println!("cargo:warning=CARGO_MANIFEST_DIR unset; Info.plist not embedded");
            return;
        };
        let plist = format!("{dir}/Info.plist");

        // ld … -sectcreate __TEXT __info_plist /path/to/Info.plist …
        for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
            println!("cargo:rustc-link-arg-bins={arg}");
        }
        println!("cargo:rerun-if-changed=Info.plist");
    }
}
