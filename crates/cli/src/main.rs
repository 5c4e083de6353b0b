use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use vulnreach::commands::*;

/// Cross-layer dependency and vulnerability-impact graph CLI.
///
/// This CLI is a thin wrapper around `vulnreach-core` (exposed in code as
/// `vulnreach_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "vulnreach",
    version,
    about = "Function, library and package level CVE reachability",
    long_about = None
)]
struct Cli {
    /// Log at debug level unless VULNREACH_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Graph level of a reach query.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Level {
    Function,
    Library,
    Package,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    /// Who reaches the start vertex.
    In,
    /// What the start vertex reaches.
    Out,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Coarse,
    Precise,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new project at the given root.
    ///
    /// This will:
    /// - Create a `.vulnreach` metadata directory and the `facts`/`results` directories.
    /// - Write a `.vulnreach/project.json` config file.
    /// - Create the graph database.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show project paths, configuration and graph size.
    ProjectInfo {
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Build library vertices and `depends_on` edges from dynamic-link facts.
    BuildLibraryGraph {
        #[arg(long, default_value = ".")]
        root: String,

        /// Fact files or directories searched for `*_elf_info.csv`. Defaults to `facts/`.
        inputs: Vec<String>,

        /// Admit every ELF class and machine, ignoring the configured filter.
        #[arg(long, default_value_t = false)]
        any_arch: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Read dynamic-link facts from ELF files and print them in the tagged line format.
    #[cfg(feature = "elf-reader")]
    ExtractElfInfo {
        /// ELF files to read.
        #[arg(required = true)]
        paths: Vec<String>,

        /// Owning package. Defaults to each file's parent directory name.
        #[arg(long)]
        package: Option<String>,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<String>,
    },

    /// Build `package_depends` edges from the library graph and/or declared relations.
    BuildPackageGraph {
        #[arg(long, default_value = ".")]
        root: String,

        /// JSON or YAML file of `{package: {depends, reverse_depends}}`.
        #[arg(long)]
        relations: Option<String>,

        /// Do not lift library dependencies to package dependencies.
        #[arg(long, default_value_t = false)]
        no_derive: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Ingest per-binary call-graph facts with a pool of workers.
    IngestBinaries {
        #[arg(long, default_value = ".")]
        root: String,

        /// Fact files or directories searched for `*.fcg.json`. Defaults to `facts/`.
        inputs: Vec<String>,

        /// Owning package for inputs that name none. Defaults to each file's parent directory.
        #[arg(long)]
        package: Option<String>,

        /// Worker count. Defaults to `ingest.workers` from the project config.
        #[arg(long)]
        workers: Option<usize>,

        /// Batch name used for markers and result files.
        #[arg(long, default_value = "ingest")]
        batch: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Record CVE records (JSON or CSV tuples) and merge their library/package lists.
    AddCves {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(required = true)]
        inputs: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Attach argument types from an LLVM ground-truth listing to a library's functions.
    ApplyGroundTruth {
        #[arg(long, default_value = ".")]
        root: String,

        /// Library key (`soname@package`).
        #[arg(long)]
        library: String,

        /// Ground-truth listing.
        #[arg(long)]
        file: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Switch a library between coarse and precise indirect-call bridges.
    SetBridgeMode {
        #[arg(long, default_value = ".")]
        root: String,

        /// Library key (`soname@package`).
        #[arg(long)]
        library: String,

        #[arg(long, value_enum)]
        mode: ModeArg,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Transitive reach of one function, library or package.
    Reach {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, value_enum, default_value = "function")]
        level: Level,

        #[arg(long, value_enum, default_value = "in")]
        direction: DirectionArg,

        /// Function key, library key or package name.
        key: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Blast radius of CVEs at function, library and package level.
    CveImpact {
        #[arg(long, default_value = ".")]
        root: String,

        /// CVE ids to report on.
        ids: Vec<String>,

        /// Run every known CVE as a batch and write per-worker result files.
        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// CVEs reachable from the exported functions of libraries.
    ExportedSurface {
        #[arg(long, default_value = ".")]
        root: String,

        /// Library keys to report on.
        libraries: Vec<String>,

        /// Run every library as a batch and write per-worker result files.
        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// CVEs a library is exposed to through calls and through dependencies.
    CveExposure {
        #[arg(long, default_value = ".")]
        root: String,

        libraries: Vec<String>,

        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Vertex and edge counts of the graph.
    Stats {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("VULNREACH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::InitProject { root, name } => init_project_command(&root, name)?,
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::BuildLibraryGraph { root, inputs, any_arch, json } => {
            build_library_graph_command(&root, &inputs, any_arch, json)?
        }
        #[cfg(feature = "elf-reader")]
        Command::ExtractElfInfo { paths, package, output } => {
            extract_elf_info_command(&paths, package.as_deref(), output.as_deref())?
        }
        Command::BuildPackageGraph { root, relations, no_derive, json } => {
            build_package_graph_command(&root, relations.as_deref(), !no_derive, json)?
        }
        Command::IngestBinaries { root, inputs, package, workers, batch, json } => {
            ingest_binaries_command(&root, &inputs, package.as_deref(), workers, &batch, json)?
        }
        Command::AddCves { root, inputs, json } => add_cves_command(&root, &inputs, json)?,
        Command::ApplyGroundTruth { root, library, file, json } => {
            apply_ground_truth_command(&root, &library, &file, json)?
        }
        Command::SetBridgeMode { root, library, mode, json } => {
            let mode = match mode {
                ModeArg::Coarse => vulnreach_core::db::BridgeMode::Coarse,
                ModeArg::Precise => vulnreach_core::db::BridgeMode::Precise,
            };
            set_bridge_mode_command(&root, &library, mode, json)?
        }
        Command::Reach { root, level, direction, key, json } => {
            let direction = match direction {
                DirectionArg::In => vulnreach_core::db::Direction::Inbound,
                DirectionArg::Out => vulnreach_core::db::Direction::Outbound,
            };
            let level = match level {
                Level::Function => ReachLevel::Function,
                Level::Library => ReachLevel::Library,
                Level::Package => ReachLevel::Package,
            };
            reach_command(&root, level, direction, &key, json)?
        }
        Command::CveImpact { root, ids, all, workers, json } => {
            cve_impact_command(&root, &ids, all, workers, json)?
        }
        Command::ExportedSurface { root, libraries, all, workers, json } => {
            exported_surface_command(&root, &libraries, all, workers, json)?
        }
        Command::CveExposure { root, libraries, all, workers, json } => {
            cve_exposure_command(&root, &libraries, all, workers, json)?
        }
        Command::Stats { root, json } => stats_command(&root, json)?,
    }

    Ok(())
}
