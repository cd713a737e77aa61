use std::env;

fn main() {
    // Use the linker script `memory.x` at the crate root
    println!(
        "cargo:rustc-link-search={}",
        env::current_dir().unwrap().display()
    );
    println!("cargo:rerun-if-changed=memory.x");
}
