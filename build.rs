fn main() {
    // 模型资源变化时重新构建
    println!("cargo:rerun-if-changed=resources/models");

    tauri_build::build()
}
