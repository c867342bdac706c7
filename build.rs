fn main() {
    // Link the native remux library only when the FFI engine is compiled in.
    // The library search path can be overridden for cross builds.
    if std::env::var("CARGO_FEATURE_FFMPEG_NATIVE").is_ok() {
        if let Ok(dir) = std::env::var("REMUX_NATIVE_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", dir);
        } else {
            println!("cargo:rustc-link-search=native=/usr/lib/x86_64-linux-gnu");
        }
        println!("cargo:rustc-link-lib=dylib=ffmpeg-remux");
        println!("cargo:rustc-link-lib=dylib=avformat");
        println!("cargo:rustc-link-lib=dylib=avcodec");
        println!("cargo:rustc-link-lib=dylib=avutil");
    }
    println!("cargo:rerun-if-env-changed=REMUX_NATIVE_LIB_DIR");
}
