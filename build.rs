use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");
    println!("cargo:rerun-if-env-changed=VCPKG_ROOT");

    // Only the FFmpeg backend links native libraries.
    if env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }
    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" {
        return;
    }
    if env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=refract: set FFMPEG_DIR (or VCPKG_ROOT) so ffmpeg-sys-next can find FFmpeg on Windows."
        );
        return;
    };

    let ffmpeg_dir = PathBuf::from(vcpkg_root)
        .join("installed")
        .join(env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string()));
    if ffmpeg_dir.exists() {
        println!(
            "cargo:warning=refract: found FFmpeg under {}; export FFMPEG_DIR to use it.",
            ffmpeg_dir.display()
        );
    } else {
        println!(
            "cargo:warning=refract: no FFmpeg install under {}.",
            ffmpeg_dir.display()
        );
    }
}
