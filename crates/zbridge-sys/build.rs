// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=ZBRIDGE_NATIVE_LIB_DIR");
    println!("cargo:rerun-if-env-changed=ZBRIDGE_NATIVE_LIB");

    if env::var_os("CARGO_FEATURE_LINK").is_none() {
        return;
    }

    if let Ok(dir) = env::var("ZBRIDGE_NATIVE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }

    let lib = env::var("ZBRIDGE_NATIVE_LIB").unwrap_or_else(|_| "zbridge_native".to_string());
    println!("cargo:rustc-link-lib=dylib={lib}");
}
