//! # Build Script
//!
//! Embeds the Windows Application Manifest (`app.manifest`, referenced from `app.rc`) into the
//! overseer executable.
//!
//! The manifest declares:
//! - Per-monitor DPI awareness for the message window.
//! - `asInvoker` execution level, so build steps never trigger a UAC prompt when they launch us.

fn main() {
    println!("cargo:rerun-if-changed=app.rc");
    println!("cargo:rerun-if-changed=app.manifest");
    // Non-Windows targets have nothing to embed; the result is ignored there as well.
    let _ = embed_resource::compile("app.rc", embed_resource::NONE);
}
