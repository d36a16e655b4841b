//! `simplefs` opens (or creates) a disk image and drives a line-oriented
//! shell against it: `format`, `mount`, `create`, `delete`, `cat`, `copyin`,
//! `copyout`, `getsize`, `debug`.

use std::fs::OpenOptions;
use std::io;
use std::io::BufRead;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;

use simplefs::{BlockDevice, FileBlockDevice, Filesystem, BLOCK_SIZE};

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program used in command line.
	prog: String,

	/// If true, print command line help.
	help: bool,

	/// The path to the disk image. Created (and zero-filled to `blocks`
	/// blocks) if it does not already exist.
	image_path: Option<PathBuf>,

	/// The number of blocks to size a newly created image at.
	blocks: u32,
}

fn error(prog: &str, msg: impl std::fmt::Display) -> ! {
	eprintln!("{prog}: {msg}");
	exit(1);
}

fn parse_args() -> Args {
	let mut args = Args {
		blocks: 64,
		..Default::default()
	};
	let mut iter = std::env::args();
	args.prog = iter.next().unwrap_or_else(|| "simplefs".to_owned());

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			"--blocks" => {
				let value = iter.next().unwrap_or_else(|| error(&args.prog, "--blocks requires a value"));
				args.blocks = value
					.parse()
					.unwrap_or_else(|_| error(&args.prog, format!("invalid block count `{value}`")));
			}

			_ => args.image_path = Some(PathBuf::from(arg)),
		}
	}

	args
}

fn print_usage(prog: &str) {
	eprintln!("{prog}: bad usage");
	eprintln!("Try '{prog} --help' for more information.");
}

fn print_help(prog: &str) {
	println!();
	println!("Usage:");
	println!(" {prog} [options] <image>");
	println!();
	println!("Opens (or creates) a SimpleFS disk image and starts an interactive shell.");
	println!();
	println!("Options:");
	println!(" -h, --help\tPrints help.");
	println!(" --blocks <n>\tSize a newly created image at <n> blocks (default: 64).");
	println!();
	println!("Shell commands:");
	println!(" format\t\t\t\tFormats the disk.");
	println!(" mount\t\t\t\tMounts the disk.");
	println!(" debug\t\t\t\tPrints the filesystem's metadata.");
	println!(" create\t\t\t\tCreates a new inode.");
	println!(" delete <inumber>\t\tDeletes an inode.");
	println!(" cat <inumber>\t\t\tPrints an inode's data to stdout.");
	println!(" copyin <host-path> <inumber>\tCopies a host file into an inode.");
	println!(" copyout <inumber> <host-path>\tCopies an inode's data to a host file.");
	println!(" getsize <inumber>\t\tPrints an inode's size.");
	println!(" help\t\t\t\tPrints this message.");
	println!(" quit, exit\t\t\tExits the shell.");
}

/// Opens `path` for reading and writing, creating and zero-filling it to
/// `blocks` blocks if it does not already exist.
fn open_image(path: &PathBuf, blocks: u32) -> io::Result<FileBlockDevice> {
	let existed = path.exists();
	let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;

	if !existed {
		let empty = [0u8; BLOCK_SIZE];
		for _ in 0..blocks {
			file.write_all(&empty)?;
		}
		file.flush()?;
	}

	FileBlockDevice::new(file)
}

fn main() {
	let args = parse_args();

	if args.help {
		print_help(&args.prog);
		exit(0);
	}

	let image_path = args
		.image_path
		.unwrap_or_else(|| error(&args.prog, "specify path to a disk image"));

	let device = open_image(&image_path, args.blocks)
		.unwrap_or_else(|e| error(&args.prog, format!("{}: {e}", image_path.display())));

	let mut fs = Filesystem::new(device);
	run_shell(&args.prog, &mut fs);
}

fn run_shell<D: BlockDevice>(prog: &str, fs: &mut Filesystem<D>) {
	let stdin = io::stdin();
	loop {
		print!("simplefs> ");
		let _ = io::stdout().flush();

		let mut line = String::new();
		if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
			break;
		}
		let words: Vec<&str> = line.split_whitespace().collect();
		let Some(&cmd) = words.first() else {
			continue;
		};

		match cmd {
			"format" => {
				if fs.format() {
					println!("disk formatted.");
				} else {
					eprintln!("{prog}: format failed.");
				}
			}

			"mount" => {
				if !fs.mount() {
					eprintln!("{prog}: mount failed.");
				}
			}

			"debug" => print!("{}", fs.debug()),

			"create" => match fs.create() {
				0 => eprintln!("{prog}: create failed."),
				inumber => println!("created inode {inumber}."),
			},

			"delete" => match words.get(1).and_then(|s| s.parse::<u32>().ok()) {
				Some(inumber) if fs.delete(inumber) => println!("inode {inumber} deleted."),
				Some(inumber) => eprintln!("{prog}: could not delete inode {inumber}."),
				None => print_usage_line(prog, "delete <inumber>"),
			},

			"getsize" => match words.get(1).and_then(|s| s.parse::<u32>().ok()) {
				Some(inumber) => println!("{}", fs.getsize(inumber)),
				None => print_usage_line(prog, "getsize <inumber>"),
			},

			"cat" => match words.get(1).and_then(|s| s.parse::<u32>().ok()) {
				Some(inumber) => cat(prog, fs, inumber),
				None => print_usage_line(prog, "cat <inumber>"),
			},

			"copyin" => match (words.get(1), words.get(2).and_then(|s| s.parse::<u32>().ok())) {
				(Some(host_path), Some(inumber)) => copyin(prog, fs, host_path, inumber),
				_ => print_usage_line(prog, "copyin <host-path> <inumber>"),
			},

			"copyout" => match (words.get(1).and_then(|s| s.parse::<u32>().ok()), words.get(2)) {
				(Some(inumber), Some(host_path)) => copyout(prog, fs, inumber, host_path),
				_ => print_usage_line(prog, "copyout <inumber> <host-path>"),
			},

			"help" => print_help(prog),
			"quit" | "exit" => break,

			other => {
				eprintln!("{prog}: unknown command `{other}`.");
				print_usage_line(prog, "help");
			}
		}
	}
}

fn print_usage_line(prog: &str, usage: &str) {
	eprintln!("{prog}: usage: {usage}");
}

/// Reads the whole of `inumber` and writes it to stdout.
fn cat<D: BlockDevice>(prog: &str, fs: &mut Filesystem<D>, inumber: u32) {
	let mut offset = 0i64;
	let mut buf = [0u8; BLOCK_SIZE];
	let stdout = io::stdout();
	let mut out = stdout.lock();
	loop {
		let n = fs.read(inumber, &mut buf, BLOCK_SIZE as i64, offset);
		if n <= 0 {
			break;
		}
		if out.write_all(&buf[..n as usize]).is_err() {
			eprintln!("{prog}: write error.");
			break;
		}
		offset += n;
	}
}

/// Streams `host_path`'s bytes into `inumber` via repeated `write()` calls.
fn copyin<D: BlockDevice>(prog: &str, fs: &mut Filesystem<D>, host_path: &str, inumber: u32) {
	let mut file = match std::fs::File::open(host_path) {
		Ok(f) => f,
		Err(e) => {
			eprintln!("{prog}: {host_path}: {e}");
			return;
		}
	};

	let mut offset = 0i64;
	let mut buf = [0u8; BLOCK_SIZE];
	loop {
		let n = match file.read(&mut buf) {
			Ok(0) => break,
			Ok(n) => n,
			Err(e) => {
				eprintln!("{prog}: {host_path}: {e}");
				return;
			}
		};
		let written = fs.write(inumber, &buf[..n], n as i64, offset);
		if written != n as i64 {
			eprintln!("{prog}: short write to inode {inumber} ({written} of {n} bytes).");
			return;
		}
		offset += written;
	}
	println!("{offset} bytes copied to inode {inumber}.");
}

/// Streams `inumber`'s data out to `host_path` via repeated `read()` calls.
fn copyout<D: BlockDevice>(prog: &str, fs: &mut Filesystem<D>, inumber: u32, host_path: &str) {
	let mut file = match std::fs::File::create(host_path) {
		Ok(f) => f,
		Err(e) => {
			eprintln!("{prog}: {host_path}: {e}");
			return;
		}
	};

	let mut offset = 0i64;
	let mut buf = [0u8; BLOCK_SIZE];
	loop {
		let n = fs.read(inumber, &mut buf, BLOCK_SIZE as i64, offset);
		if n <= 0 {
			break;
		}
		if let Err(e) = file.write_all(&buf[..n as usize]) {
			eprintln!("{prog}: {host_path}: {e}");
			return;
		}
		offset += n;
	}
	println!("{offset} bytes copied to {host_path}.");
}
