//! Build script for CatLock
//!
//! Embeds the Windows application manifest into the executable

fn main() {
    // Only compile resources on Windows
    #[cfg(windows)]
    {
        embed_resource::compile("resources/catlock.rc", embed_resource::NONE);
    }

    println!("cargo:rerun-if-changed=resources/catlock.rc");
    println!("cargo:rerun-if-changed=resources/catlock.manifest");
}
