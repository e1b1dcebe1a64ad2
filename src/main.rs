use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yaolist_s3fs::config;
use yaolist_s3fs::storage::{FileReader, FileSystem, FileSystemManager, FileWriter, FsBox, RemoteFileSystem};

const USAGE: &str = "usage: s3fs <fs-id> <command> [args]

commands:
  ls <dir>                          list files under a directory
  stat <path>                       print object size
  exists <path>                     print true/false
  rm <path>...                      delete files
  rmdir <dir>                       delete a directory recursively
  upload <local> <dest> [...]       upload local files (pairs)
  cat <path>                        write an object to stdout
  put <dest>                        write stdin to an object";

/// 读取缓冲区大小
const CAT_CHUNK: usize = 1024 * 1024;

fn main() {
    // Initialize logging / 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yaolist_s3fs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--version") {
        println!("s3fs {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));
        return;
    }

    if let Err(e) = run(&args) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let (fs_id, command, rest) = match args {
        [fs_id, command, rest @ ..] => (fs_id, command.as_str(), rest),
        _ => bail!("{}", USAGE),
    };

    // Load configuration / 加载配置
    let app_config = config::load_config()?;
    let entry = app_config
        .filesystem(fs_id)
        .cloned()
        .ok_or_else(|| anyhow!("filesystem not configured: {}", fs_id))?;
    config::init_config(app_config)?;

    let manager = FileSystemManager::new();
    yaolist_s3fs::register_filesystems(&manager);
    let fs = manager.create_filesystem(&entry.id, &entry.fs_type, entry.config)?;
    if let Some(err) = manager.last_error(&entry.id) {
        bail!("failed to connect {}: {}", entry.id, err);
    }

    execute(&fs, command, rest)
}

fn execute(fs: &FsBox, command: &str, args: &[String]) -> Result<()> {
    match (command, args) {
        ("ls", [dir]) => {
            for file in fs.list(dir)? {
                println!("{}", file);
            }
        }
        ("stat", [path]) => println!("{}", fs.file_size(path)?),
        ("exists", [path]) => println!("{}", fs.exists(path)?),
        ("rm", [path]) => fs.delete_file(path)?,
        ("rm", paths) if !paths.is_empty() => fs.batch_delete(paths)?,
        ("rmdir", [dir]) => fs.delete_directory(dir)?,
        ("upload", [local, dest]) => fs.upload(&PathBuf::from(local), dest)?,
        ("upload", pairs) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            let locals: Vec<PathBuf> = pairs.iter().step_by(2).map(PathBuf::from).collect();
            let dests: Vec<String> = pairs.iter().skip(1).step_by(2).cloned().collect();
            fs.batch_upload(&locals, &dests)?;
        }
        ("cat", [path]) => {
            let reader = fs.open_file(path)?;
            let mut stdout = std::io::stdout().lock();
            let mut buf = vec![0u8; CAT_CHUNK];
            let mut offset = 0u64;
            while offset < reader.size() {
                let n = reader.read_at(offset, &mut buf)?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n])?;
                offset += n as u64;
            }
            stdout.flush()?;
        }
        ("put", [dest]) => {
            let mut writer = fs.create_file(dest)?;
            let mut stdin = std::io::stdin().lock();
            let mut buf = vec![0u8; CAT_CHUNK];
            loop {
                let n = stdin.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.append(&buf[..n])?;
            }
            writer.close()?;
            tracing::info!("Wrote {} bytes to {}", writer.bytes_appended(), writer.path());
        }
        _ => bail!("{}", USAGE),
    }
    Ok(())
}
