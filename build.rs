//! Build script: links the native WarpCTC library when the `warpctc` feature is enabled.
//!
//! The library root comes from `CTC_LIB`. It must hold `include/ctc.h` and a
//! `build/` directory with `libwarpctc`. Anything missing is a configuration
//! error and aborts the build.

fn main() {
    #[cfg(feature = "warpctc")]
    {
        use std::path::Path;

        println!("cargo:rerun-if-env-changed=CTC_LIB");

        let ctc_lib = match std::env::var("CTC_LIB") {
            Ok(path) => path,
            Err(_) => panic!(
                "the `warpctc` feature needs CTC_LIB to point at a WarpCTC checkout \
                 (with include/ctc.h and build/libwarpctc)"
            ),
        };
        let root = Path::new(&ctc_lib);

        let header = root.join("include").join("ctc.h");
        if !header.is_file() {
            panic!("WarpCTC header not found at {}", header.display());
        }

        let build_dir = root.join("build");
        if !build_dir.is_dir() {
            panic!("WarpCTC build directory not found at {}", build_dir.display());
        }

        println!("cargo:rustc-link-search=native={}", build_dir.display());
        println!("cargo:rustc-link-lib=dylib=warpctc");
        println!("cargo:rerun-if-changed={}", header.display());
    }
}
