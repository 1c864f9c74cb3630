use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;

use nnet::Nnet;

/// Inspect, create and edit network model files.
#[derive(Parser)]
#[command(name = "nnet", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the topology and parameter statistics of a model.
    Info {
        /// Model file, binary or text.
        model: PathBuf,
    },

    /// Create a randomly initialized model from a prototype file.
    Init {
        /// Prototype file, one component per line.
        proto: PathBuf,

        /// Output model file.
        output: PathBuf,

        /// Write in text mode.
        #[arg(long)]
        text: bool,
    },

    /// Copy a model, optionally removing components or changing dropout retention.
    Copy {
        input: PathBuf,

        output: PathBuf,

        /// Remove this many leading components.
        #[arg(long, default_value_t = 0)]
        remove_first: usize,

        /// Remove this many trailing components.
        #[arg(long, default_value_t = 0)]
        remove_last: usize,

        /// Set the retention of every dropout component.
        #[arg(long)]
        dropout_retention: Option<f32>,

        /// Write in text mode.
        #[arg(long)]
        text: bool,
    },

    /// Concatenate models into one.
    Concat {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long, short)]
        output: PathBuf,

        /// Write in text mode.
        #[arg(long)]
        text: bool,
    },
}

fn read_model(path: &Path) -> Result<Nnet> {
    Nnet::read_from_path(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_model(nnet: &Nnet, path: &Path, text: bool) -> Result<()> {
    nnet.write_to_path(path, !text)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("written model to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Info { model } => {
            let nnet = read_model(&model)?;
            print!("{}", nnet.info());
        }
        Command::Init {
            proto,
            output,
            text,
        } => {
            let nnet = Nnet::init_from_path(&proto)
                .with_context(|| format!("failed to initialize from {}", proto.display()))?;
            write_model(&nnet, &output, text)?;
        }
        Command::Copy {
            input,
            output,
            remove_first,
            remove_last,
            dropout_retention,
            text,
        } => {
            let mut nnet = read_model(&input)?;
            if remove_first + remove_last > nnet.n_components() {
                bail!(
                    "cannot remove {} components from a network of {}",
                    remove_first + remove_last,
                    nnet.n_components()
                );
            }
            for _ in 0..remove_first {
                nnet.remove_component(0)?;
            }
            for _ in 0..remove_last {
                nnet.remove_component(nnet.n_components() - 1)?;
            }
            if let Some(retention) = dropout_retention {
                nnet.set_dropout_retention(retention)?;
            }
            write_model(&nnet, &output, text)?;
        }
        Command::Concat {
            inputs,
            output,
            text,
        } => {
            let mut nnet = Nnet::new();
            for input in &inputs {
                let next = read_model(input)?;
                nnet.append_nnet(&next)
                    .with_context(|| format!("cannot append {}", input.display()))?;
            }
            write_model(&nnet, &output, text)?;
        }
    }
    Ok(())
}
