use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn collect_protos(dir: &Path, acc: &mut Vec<PathBuf>) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_protos(&path, acc);
            } else if path.extension().and_then(|e| e.to_str()) == Some("proto") {
                acc.push(path);
            }
        }
    }
}

fn main() {
    if env::var("CARGO_FEATURE_MESHTASTIC_PROTO").is_err() {
        return;
    }

    // Vendored protoc so builds do not depend on a system install.
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        env::set_var("PROTOC", &path);
    }

    println!("cargo:rerun-if-env-changed=MESHTASTIC_PROTO_DIR");
    println!("cargo:rerun-if-changed=protos");

    // MESHTASTIC_PROTO_DIR may point at a full upstream checkout instead of the bundled subset.
    let root = PathBuf::from(env::var("MESHTASTIC_PROTO_DIR").unwrap_or_else(|_| "protos".into()));

    let mut protos = Vec::new();
    collect_protos(&root, &mut protos);
    if protos.is_empty() {
        panic!(
            "No Meshtastic .proto files found under '{}'. Set MESHTASTIC_PROTO_DIR to a directory containing meshtastic/*.proto",
            root.display()
        );
    }
    protos.sort();
    protos.dedup();

    // Imports are written as `meshtastic/<file>.proto`, so the include root is the
    // directory above `meshtastic/`.
    let include = if root.file_name().and_then(|n| n.to_str()) == Some("meshtastic") {
        root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone())
    } else {
        root.clone()
    };

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[include])
        .expect("Failed to compile Meshtastic protos");
}
