use arrayfs::{InodeMode, OpenMode};

pub fn main() {
    arrayfs::init().expect("format arrayfs");
    let mount = arrayfs::mount().expect("mount arrayfs");

    // Build a small tree and write a file.
    let docs = mount
        .open("/docs", OpenMode::Directory)
        .and_then(|node| node.into_dir())
        .expect("mkdir /docs");
    let readme = docs
        .create("README", InodeMode::file_default())
        .expect("create /docs/README");
    readme
        .write_at(0, b"arrayfs keeps everything in memory\n")
        .expect("write /docs/README");

    for entry in mount.root().read_dir().expect("readdir /") {
        println!("{:>3} {:?} {}", entry.ino, entry.type_, entry.name);
    }

    let mut buf = vec![0; 64];
    let n = readme.read_at(0, &mut buf).expect("read /docs/README");
    print!("{}", String::from_utf8_lossy(&buf[..n]));

    let sb = mount.super_block();
    println!(
        "{} of {} inodes free, files up to {} bytes",
        sb.free_inodes_count,
        sb.inodes_count,
        sb.max_file_size()
    );
}
