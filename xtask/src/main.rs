//! Dev-only task runner: generates the `octolab` CLI's man page and shell
//! completions so they can be checked into packaging without running the
//! binary on the target machine.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use octolab_cli::Cli;

#[derive(Parser)]
#[command(name = "xtask")]
struct Args {
    #[command(subcommand)]
    command: Task,
}

#[derive(clap::Subcommand)]
enum Task {
    /// Render the roff man page for `octolab` into `out_dir`
    Man {
        #[arg(long, default_value = "target/man")]
        out_dir: PathBuf,
    },
    /// Render shell completions for `octolab` into `out_dir`
    Completions {
        #[arg(long, value_enum)]
        shell: Shell,
        #[arg(long, default_value = "target/completions")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Shell {
    Bash,
    Zsh,
    Fish,
}

impl From<Shell> for clap_complete::Shell {
    fn from(s: Shell) -> Self {
        match s {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Task::Man { out_dir } => render_man(&out_dir),
        Task::Completions { shell, out_dir } => render_completions(shell, &out_dir),
    }
}

fn render_man(out_dir: &PathBuf) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("failed to create {}", out_dir.display()))?;
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf: Vec<u8> = Vec::new();
    man.render(&mut buf)?;
    let path = out_dir.join("octolab.1");
    fs::write(&path, buf).with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn render_completions(shell: Shell, out_dir: &PathBuf) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let path = clap_complete::generate_to(clap_complete::Shell::from(shell), &mut cmd, name, out_dir)
        .context("failed to generate shell completions")?;
    println!("wrote {}", path.display());
    Ok(())
}
