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
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    // Assemble a .vdjca file into clonotypes
    Assemble {
        // Input .vdjca file
        #[arg(group = "input", required = true, help = "Input .vdjca file")]
        input_file: PathBuf,

        // Output file path
        #[arg(short = 'o', long = "output", required = true)]
        out_file: PathBuf,

        // Assembler parameters in TOML, defaults if not given
        #[arg(long = "params", required = false)]
        params_file: Option<PathBuf>,

        // Number of worker threads
        #[arg(short = 't', long = "threads", default_value_t = 1)]
        num_threads: usize,

        // Memory budget of the alignment sort in megabytes
        #[arg(long = "sort-memory", default_value_t = 256)]
        sort_memory: usize,

        // Directory for temporary files
        #[arg(long = "tmp-dir", required = false)]
        temp_dir: Option<PathBuf>,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Build the alignment to clone index of a .clna file
    Index {
        // Input .clna file
        #[arg(group = "input", required = true, help = "Input .clna file")]
        input_file: PathBuf,

        // Output file path
        #[arg(short = 'o', long = "output", required = true)]
        out_file: PathBuf,

        // Memory budget of the index sort in megabytes
        #[arg(long = "sort-memory", default_value_t = 256)]
        sort_memory: usize,

        // Directory for temporary files
        #[arg(long = "tmp-dir", required = false)]
        temp_dir: Option<PathBuf>,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Print counts and the assembly report of a .clna file
    Info {
        // Input .clna file
        #[arg(group = "input", required = true, help = "Input .clna file")]
        input_file: PathBuf,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },
}
