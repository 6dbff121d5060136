//! Build script for poisonalloc.
//!
//! Warns about feature combinations that are easy to ship by accident.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEBUG");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_NIGHTLY");
    println!("cargo:rerun-if-env-changed=POISONALLOC_STRICT");

    let debug_enabled = env::var("CARGO_FEATURE_DEBUG").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();
    let nightly_enabled = env::var("CARGO_FEATURE_NIGHTLY").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    // =========================================================================
    // Feature-specific diagnostics
    // =========================================================================

    if debug_enabled && is_release {
        emit_warning("'debug' feature enabled in a release build!");
        emit_note("Every allocation captures a backtrace and takes a lock.");
        emit_note("Do not install the allocator as #[global_allocator] with 'debug' on.");
    }

    if diagnostics_enabled && is_release {
        emit_info("Diagnostics will be printed to stderr in this release build");
    }

    if nightly_enabled {
        check_nightly_compiler();
    }

    if let Ok(mode) = env::var("POISONALLOC_STRICT") {
        emit_info(&format!(
            "POISONALLOC_STRICT={} is read at runtime by diagnostics::init_from_env()",
            mode
        ));
    }
}

// =============================================================================
// Diagnostic emission helpers
// =============================================================================

fn emit_info(msg: &str) {
    println!("cargo:warning=[poisonalloc] ℹ️  {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[poisonalloc]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[poisonalloc] ⚠️  {}", msg);
}

// =============================================================================
// Toolchain checks
// =============================================================================

fn check_nightly_compiler() {
    let Ok(rustc) = env::var("RUSTC") else {
        return;
    };

    if let Ok(output) = std::process::Command::new(&rustc).arg("--version").output() {
        let version = String::from_utf8_lossy(&output.stdout);
        if !version.contains("nightly") {
            emit_warning("'nightly' feature enabled but compiler doesn't appear to be nightly!");
            emit_note("std::alloc::Allocator requires nightly Rust.");
            emit_note("Use nightly: rustup override set nightly");
        }
    }
}
