// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Flags shared by build and install
fn build_args() -> Vec<Arg> {
    let flag = |name: &'static str, long: &'static str, help: &'static str| {
        Arg::new(name)
            .long(long)
            .action(ArgAction::SetTrue)
            .help(help)
    };
    vec![
        Arg::new("packages")
            .required(true)
            .num_args(1..)
            .help("Package names"),
        flag("force", "force", "Build even if the package was already built").short('f'),
        flag("clean", "clean", "Remove the previous source tree before building").short('C'),
        flag("skippgpcheck", "skippgpcheck", "Do not verify source signatures"),
        flag("noconfirm", "noconfirm", "Do not ask for confirmation when installing"),
        flag("no_sandbox", "no-sandbox", "Build directly on the host"),
        flag("keep_sources", "keep-sources", "Keep extracted sources after building"),
        flag("no_deps", "no-deps", "Do not install missing dependencies"),
        flag("no_review", "no-review", "Skip the security review"),
    ]
}

fn build_cli() -> Command {
    Command::new("pacforge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Pacforge Contributors")
        .about("Build and install community packages in a sandbox")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v debug, -vv trace)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (default: $XDG_CONFIG_HOME/pacforge/config.toml)"),
        )
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .value_name("DIR")
                .global(true)
                .help("Override the build cache directory"),
        )
        .subcommand(
            Command::new("build")
                .about("Fetch, review and build packages without installing them")
                .args(build_args()),
        )
        .subcommand(
            Command::new("install")
                .about("Build packages and install the resulting archives")
                .args(build_args())
                .arg(
                    Arg::new("asdeps")
                        .long("asdeps")
                        .action(ArgAction::SetTrue)
                        .help("Mark the installed packages as dependencies"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show registry details and the review summary of a package")
                .arg(Arg::new("package").required(true).help("Package name"))
                .arg(
                    Arg::new("raw")
                        .long("raw")
                        .action(ArgAction::SetTrue)
                        .help("Print the cached PKGBUILD with line numbers"),
                ),
        )
        .subcommand(
            Command::new("cache")
                .about("Manage the build cache")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List cached packages"))
                .subcommand(
                    Command::new("clean")
                        .about("Remove cached packages")
                        .arg(Arg::new("package").help("Package base to remove"))
                        .arg(
                            Arg::new("all")
                                .long("all")
                                .action(ArgAction::SetTrue)
                                .help("Remove the whole cache"),
                        ),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("pacforge.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
