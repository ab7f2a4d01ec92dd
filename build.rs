fn main() {
    // ── macOS: Bluetooth permission for the CLI binary ────────────────────────
    //
    // CoreBluetooth refuses to power on the central manager for a binary that
    // carries no NSBluetoothAlwaysUsageDescription.  A plain Cargo binary has
    // no app bundle, so the plist is linked into the `__TEXT,__info_plist`
    // section where the OS looks for it.
    //
    // `CARGO_CFG_TARGET_OS` is the target, so a Linux host cross-building for
    // macOS still gets the section.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
            println!("cargo:warning=CARGO_MANIFEST_DIR unset, Info.plist not embedded");
            return;
        };

        for arg in [
            "-sectcreate".to_owned(),
            "__TEXT".to_owned(),
            "__info_plist".to_owned(),
            format!("{dir}/Info.plist"),
        ] {
            println!("cargo:rustc-link-arg-bins={arg}");
        }

        println!("cargo:rerun-if-changed=Info.plist");
    }
}
