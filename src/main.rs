// clna: Clonotype assembly and indexed clone storage.
//
// Copyright 2025 The clna authors.
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use log::error;
use log::info;

use clna::clna::reader::ClnaReader;
use clna::mapping::index::write_index_from_clna;
use clna::params::AssemblerParameters;
use clna::params::AssemblyOptions;
use clna::vdjca::VdjcaFile;

mod cli;

/// Initializes the logger with verbosity given in `log_max_level`.
fn init_log(log_max_level: usize) {
    let initialized = stderrlog::new()
    .module(module_path!())
    .module("clna")
    .quiet(false)
    .verbosity(log_max_level)
    .timestamp(stderrlog::Timestamp::Off)
    .init();
    if initialized.is_err() {
        eprintln!("clna: logger was already initialized");
    }
}

fn assemble(
    input_file: &Path,
    out_file: &Path,
    params_file: Option<&Path>,
    num_threads: usize,
    options: &AssemblyOptions,
) -> clna::Result<()> {
    let params = match params_file {
        Some(file) => AssemblerParameters::from_toml_file(file)?,
        None => AssemblerParameters::default(),
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    let conn = BufWriter::new(File::create(out_file)?);
    let summary = pool.install(|| clna::assemble_to_clna(&VdjcaFile::new(input_file), &params, options, conn))?;
    info!("{}", summary);
    Ok(())
}

fn index(
    input_file: &Path,
    out_file: &Path,
    options: &AssemblyOptions,
) -> clna::Result<()> {
    let mut reader = ClnaReader::open(input_file)?;
    let mut conn = BufWriter::new(File::create(out_file)?);
    let count = write_index_from_clna(&mut reader, &mut conn, options)?;
    info!("Wrote index of {} alignments to {}", count, out_file.display());
    Ok(())
}

fn print_info(
    input_file: &Path,
) -> clna::Result<()> {
    let reader = ClnaReader::open(input_file)?;
    info!("Written by {}", reader.version());
    info!("Clones: {}", reader.number_of_clones());
    info!("Alignments: {}", reader.number_of_alignments());
    info!("{}", reader.footer());
    Ok(())
}

fn options(temp_dir: &Option<PathBuf>, sort_memory: usize) -> AssemblyOptions {
    AssemblyOptions {
        sort_memory_budget: sort_memory.saturating_mul(1024 * 1024),
        temp_dir: temp_dir.clone(),
        ..AssemblyOptions::default()
    }
}

fn main() {
    let cli = cli::Cli::parse();

    // Subcommands:
    let res = match &cli.command {
        // Assemble
        Some(cli::Commands::Assemble {
            input_file,
            out_file,
            params_file,
            num_threads,
            sort_memory,
            temp_dir,
            verbose,
        }) => {
            init_log(if *verbose { 3 } else { 2 });
            assemble(input_file, out_file, params_file.as_deref(), *num_threads, &options(temp_dir, *sort_memory))
        },

        // Index
        Some(cli::Commands::Index {
            input_file,
            out_file,
            sort_memory,
            temp_dir,
            verbose,
        }) => {
            init_log(if *verbose { 3 } else { 2 });
            index(input_file, out_file, &options(temp_dir, *sort_memory))
        },

        // Info
        Some(cli::Commands::Info {
            input_file,
            verbose,
        }) => {
            init_log(if *verbose { 3 } else { 2 });
            print_info(input_file)
        },

        None => Ok(()),
    };

    if let Err(e) = res {
        error!("{}", e);
        std::process::exit(1);
    }
}
