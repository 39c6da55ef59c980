#[cfg(not(all(feature = "bpf", target_os = "linux")))]
fn main() {}

#[cfg(all(feature = "bpf", target_os = "linux"))]
fn main() {
    bpf::generate();
}

#[cfg(all(feature = "bpf", target_os = "linux"))]
mod bpf {
    use libbpf_cargo::SkeletonBuilder;
    use std::env;
    use std::path::PathBuf;

    const SOURCES: &[(&str, &str)] = &[("http_red", "src/agent/probe/bpf/http_red.bpf.c")];

    pub fn generate() {
        let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR must be set"));

        for (name, src) in SOURCES {
            let out = out_dir.join(format!("{name}.bpf.rs"));

            SkeletonBuilder::new()
                .source(src)
                .obj(out_dir.join(format!("{name}.bpf.o")))
                .clang_args(["-I", "src/agent/probe/bpf"])
                .build_and_generate(&out)
                .unwrap();

            println!("cargo:rerun-if-changed={src}");
        }

        println!("cargo:rerun-if-changed=src/agent/probe/bpf/http_red.h");
    }
}
