// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Stages chain: any number of `embed`, `cluster` and `tsne`
// segments may follow the root arguments, in any order.
//
//   spectral-relay out/analysis.json \
//       embed attributions.json --eigvals 32 \
//       cluster --clusters 2,3,4 \
//       tsne
//
// clap has no chained subcommands, so the root command collects
// every word after DATA, splits it at stage names, and parses each
// segment with its own `StageLine` parser. A stage name only starts
// a new stage where the current stage expects neither an option
// value nor a positional argument, so `--exname embed` stays a value.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use commands::{ClusterArgs, EmbedArgs, StageCommand, StageLine, TsneArgs, STAGE_NAMES};

use crate::application::cluster_use_case::ClusterUseCase;
use crate::application::context::{RunContext, StageOptions, StageReport};
use crate::application::embed_use_case::EmbedUseCase;
use crate::application::tsne_use_case::TsneUseCase;
use crate::infra::logging;

const STAGE_HELP: &str = "\
Stages (chain any number, in any order):
  embed <ATTRIBUTION> [OPTIONS]  Compute the spectral embedding
  cluster [OPTIONS]              Compute k-means clusterings
  tsne [OPTIONS]                 Compute a 2-D t-SNE projection

Run `spectral-relay <DATA> <STAGE> --help` for a stage's options.";

/// The root command: shared options, then the chained stages.
#[derive(Parser, Debug)]
#[command(
    name = "spectral-relay",
    version,
    about = "Spectral embedding, clustering and t-SNE over attribution data, with checkpointed results.",
    after_help = STAGE_HELP
)]
pub struct Cli {
    /// Analysis file the stages read from and write to
    pub data: PathBuf,

    /// Experiment group inside the analysis file
    #[arg(long, default_value = "default")]
    pub exname: String,

    /// Replace keys that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Recompute even when the target keys already exist
    #[arg(long)]
    pub modify: bool,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Stages and their options
    #[arg(value_name = "STAGE", trailing_var_arg = true, allow_hyphen_values = true)]
    pub stages: Vec<String>,
}

impl Cli {
    /// Parse the stage words into commands, in the order given.
    pub fn stage_commands(&self) -> Result<Vec<StageCommand>, clap::Error> {
        let mut segments: Vec<Vec<&str>> = Vec::new();
        let mut shape = SegmentShape::default();
        let mut expects_value = false;

        for word in self.stages.iter().map(String::as_str) {
            let awaiting_input = expects_value || shape.positionals > 0;
            if STAGE_NAMES.contains(&word) && !awaiting_input {
                segments.push(vec![word]);
                shape = SegmentShape::of(word);
                continue;
            }
            let Some(segment) = segments.last_mut() else {
                return Err(Cli::command().error(
                    ErrorKind::InvalidSubcommand,
                    format!("'{word}' is not a stage; expected one of {}", STAGE_NAMES.join(", ")),
                ));
            };
            segment.push(word);

            if expects_value {
                expects_value = false;
            } else if word.starts_with('-') {
                expects_value = shape.takes_value(word);
            } else {
                shape.positionals = shape.positionals.saturating_sub(1);
            }
        }
        if segments.is_empty() {
            return Err(Cli::command().error(
                ErrorKind::MissingSubcommand,
                format!("no stage given; expected one of {}", STAGE_NAMES.join(", ")),
            ));
        }

        segments
            .into_iter()
            .map(|segment| StageLine::try_parse_from(segment).map(|line| line.stage))
            .collect()
    }

    fn root_options(&self) -> StageOptions {
        StageOptions {
            data:      self.data.clone(),
            exname:    self.exname.clone(),
            overwrite: self.overwrite,
            modify:    self.modify,
        }
    }

    /// Run every stage in order, sharing one RunContext.
    pub fn run(self) -> Result<()> {
        let stages = self.stage_commands().unwrap_or_else(|e| e.exit());
        logging::init(self.log.as_deref(), self.verbose)?;

        let mut ctx = RunContext::default();
        for stage in stages {
            let name = stage.name();
            let report = match stage {
                StageCommand::Embed(args)   => self.run_embed(args, &mut ctx)?,
                StageCommand::Cluster(args) => self.run_cluster(args, &mut ctx)?,
                StageCommand::Tsne(args)    => self.run_tsne(args, &mut ctx)?,
            };
            if report.is_noop() {
                tracing::info!("{name}: nothing to do ({report})");
            } else {
                tracing::info!("{name}: {report}");
            }
        }
        Ok(())
    }

    /// Handles the `embed` stage.
    /// Converts CLI args into an EmbedConfig and hands off to Layer 2.
    fn run_embed(&self, args: EmbedArgs, ctx: &mut RunContext) -> Result<StageReport> {
        let opts = args.flags.resolve(&self.root_options());
        EmbedUseCase::new(args.into()).execute(&opts, ctx)
    }

    fn run_cluster(&self, args: ClusterArgs, ctx: &mut RunContext) -> Result<StageReport> {
        let opts = args.flags.resolve(&self.root_options());
        ClusterUseCase::new(args.into()).execute(&opts, ctx)
    }

    fn run_tsne(&self, args: TsneArgs, ctx: &mut RunContext) -> Result<StageReport> {
        let opts = args.flags.resolve(&self.root_options());
        TsneUseCase::new(args.into()).execute(&opts, ctx)
    }
}

/// How a stage consumes the words that follow its name
#[derive(Debug, Default)]
struct SegmentShape {
    value_options: Vec<String>,
    positionals:   usize,
}

impl SegmentShape {
    fn of(stage: &str) -> Self {
        let line = StageLine::command();
        let Some(command) = line.find_subcommand(stage) else {
            return Self::default();
        };
        let value_options = command
            .get_arguments()
            .filter(|arg| !arg.is_positional() && arg.get_action().takes_values())
            .filter_map(|arg| arg.get_long())
            .map(|long| format!("--{long}"))
            .collect();
        Self { value_options, positionals: command.get_positionals().count() }
    }

    /// `--name value` form. `--name=value` carries its own value.
    fn takes_value(&self, word: &str) -> bool {
        self.value_options.iter().any(|option| option == word)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Cli {
        Cli::try_parse_from(line.split_whitespace()).unwrap()
    }

    #[test]
    fn test_root_arguments() {
        let cli = parse("spectral-relay --exname run1 --modify -vv out.json embed attr.json");
        assert_eq!(cli.data, PathBuf::from("out.json"));
        assert_eq!(cli.exname, "run1");
        assert!(cli.modify && !cli.overwrite);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_splits_chain_at_stage_names() {
        let cli = parse(
            "spectral-relay out.json embed attr.json --label-filter 1,2 --eigvals 16 \
             cluster --clusters 3,4 --loaded tsne --perplexity 5",
        );
        let stages = cli.stage_commands().unwrap();
        let names: Vec<_> = stages.iter().map(StageCommand::name).collect();
        assert_eq!(names, ["embed", "cluster", "tsne"]);

        let StageCommand::Embed(embed) = &stages[0] else { panic!("expected embed") };
        assert_eq!(embed.attribution, PathBuf::from("attr.json"));
        assert_eq!(embed.label_filter, Some(vec![1, 2]));
        assert_eq!(embed.eigvals, 16);
        assert_eq!(embed.knn, 10);

        let StageCommand::Cluster(cluster) = &stages[1] else { panic!("expected cluster") };
        assert_eq!(cluster.clusters, vec![3, 4]);
        assert!(!cluster.source.use_computed());

        let StageCommand::Tsne(tsne) = &stages[2] else { panic!("expected tsne") };
        assert_eq!(tsne.perplexity, 5.0);
        assert!(tsne.source.use_computed());
    }

    #[test]
    fn test_stage_defaults_and_repeats() {
        let cli = parse("spectral-relay out.json cluster cluster --eigvals 4");
        let stages = cli.stage_commands().unwrap();
        assert_eq!(stages.len(), 2);
        let StageCommand::Cluster(first) = &stages[0] else { panic!("expected cluster") };
        assert_eq!(first.clusters, vec![2, 3, 4, 5]);
        assert_eq!(first.eigvals, 8);
    }

    #[test]
    fn test_stage_flags_combine_with_root() {
        let cli = parse("spectral-relay --overwrite out.json tsne --modify --exname other");
        let StageCommand::Tsne(tsne) = cli.stage_commands().unwrap().remove(0) else {
            panic!("expected tsne")
        };
        let opts = tsne.flags.resolve(&cli.root_options());
        assert!(opts.overwrite && opts.modify);
        assert_eq!(opts.exname, "other");
        assert_eq!(opts.data, PathBuf::from("out.json"));
    }

    #[test]
    fn test_stage_names_as_values_do_not_split() {
        let cli = parse("spectral-relay out.json cluster --exname embed --output tsne tsne");
        let stages = cli.stage_commands().unwrap();
        assert_eq!(stages.len(), 2);
        let StageCommand::Cluster(cluster) = &stages[0] else { panic!("expected cluster") };
        assert_eq!(cluster.flags.exname.as_deref(), Some("embed"));
        assert_eq!(cluster.output, Some(PathBuf::from("tsne")));
        assert_eq!(stages[1].name(), "tsne");

        let cli = parse("spectral-relay out.json embed tsne --knn 3 cluster");
        let stages = cli.stage_commands().unwrap();
        let StageCommand::Embed(embed) = &stages[0] else { panic!("expected embed") };
        assert_eq!(embed.attribution, PathBuf::from("tsne"));
        assert_eq!(embed.knn, 3);
        assert_eq!(stages[1].name(), "cluster");
    }

    #[test]
    fn test_rejects_bad_chains() {
        let unknown = parse("spectral-relay out.json plot").stage_commands().unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::InvalidSubcommand);

        let empty = parse("spectral-relay out.json").stage_commands().unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::MissingSubcommand);

        // embed needs its attribution file
        assert!(parse("spectral-relay out.json embed").stage_commands().is_err());
        assert!(parse("spectral-relay out.json cluster --clusters x").stage_commands().is_err());
    }
}
