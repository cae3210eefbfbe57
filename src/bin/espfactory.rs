use clap::{Parser, Subcommand};
use espfactory::{
    cli::{
        flash, locate, merge, print_partition_table, register, upload_target, EnvArgs, MergeArgs,
        PartitionTableArgs, UploadTargetArgs,
    },
    logging::initialize_logger,
};
use log::{debug, LevelFilter};
use miette::Result;

#[derive(Debug, Parser)]
#[clap(about, propagate_version = true, version)]
struct Cli {
    #[clap(flatten)]
    env_args: EnvArgs,
    #[clap(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a CSV partition table
    PartitionTable(PartitionTableArgs),
    /// Print the path of the factory image, downloading it if necessary
    Locate,
    /// Register the factory image at the offset of the `factory` partition and
    /// print the resulting extra images
    Register,
    Merge(MergeArgs),
    UploadTarget(UploadTargetArgs),
    /// Write the factory image to the connected device
    FlashFactory,
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let cli = Cli::parse();
    debug!("{:#?}", cli);

    let env = cli.env_args.build_env()?;

    match cli.subcommand {
        Commands::PartitionTable(args) => print_partition_table(args, &env),
        Commands::Locate => locate(&env),
        Commands::Register => register(&env),
        Commands::Merge(args) => merge(args, &env),
        Commands::UploadTarget(args) => upload_target(args, &env),
        Commands::FlashFactory => flash(&env),
    }
}
