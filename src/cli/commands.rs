// ============================================================
// Layer 1 — CLI Stage Commands and Arguments
// ============================================================
// Defines the three chainable stages: `embed`, `cluster`, `tsne`
// and all their configurable flags.
//
// Every stage also accepts the shared flags (--data, --exname,
// --overwrite, --modify). Values given on a stage override the
// root command's for that stage only; the boolean flags are OR-ed
// with the root's.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::application::cluster_use_case::ClusterConfig;
use crate::application::context::StageOptions;
use crate::application::embed_use_case::EmbedConfig;
use crate::application::tsne_use_case::TsneConfig;
use crate::data::preprocessor::Preprocess;

/// Names that start a new stage in a chained command line
pub const STAGE_NAMES: [&str; 3] = ["embed", "cluster", "tsne"];

/// One stage segment of a chained command line, parsed on its own.
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
pub struct StageLine {
    #[command(subcommand)]
    pub stage: StageCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum StageCommand {
    /// Compute the spectral embedding of an attribution file
    Embed(EmbedArgs),

    /// Compute k-means clusterings of the embedding
    Cluster(ClusterArgs),

    /// Compute a 2-D t-SNE projection of the embedding
    Tsne(TsneArgs),
}

impl StageCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StageCommand::Embed(_)   => "embed",
            StageCommand::Cluster(_) => "cluster",
            StageCommand::Tsne(_)    => "tsne",
        }
    }
}

// ─── Shared Flags ─────────────────────────────────────────────────────────────

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct StageFlags {
    /// Analysis file for this stage (defaults to the root DATA)
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Experiment group for this stage (defaults to the root --exname)
    #[arg(long)]
    pub exname: Option<String>,

    /// Replace keys that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Recompute even when the target keys already exist
    #[arg(long)]
    pub modify: bool,
}

impl StageFlags {
    /// Apply these flags on top of the root command's options
    pub fn resolve(&self, root: &StageOptions) -> StageOptions {
        StageOptions {
            data:      self.data.clone().unwrap_or_else(|| root.data.clone()),
            exname:    self.exname.clone().unwrap_or_else(|| root.exname.clone()),
            overwrite: root.overwrite || self.overwrite,
            modify:    root.modify || self.modify,
        }
    }
}

/// `--computed` (default) or `--loaded`: where eigenvectors come from.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SourceFlags {
    /// Use the embedding computed earlier in this run, if any
    #[arg(long, overrides_with = "loaded")]
    pub computed: bool,

    /// Always load the embedding from the data file
    #[arg(long, overrides_with = "computed")]
    pub loaded: bool,
}

impl SourceFlags {
    pub fn use_computed(&self) -> bool {
        !self.loaded
    }
}

// ─── embed ────────────────────────────────────────────────────────────────────

#[derive(Args, Debug, Clone, PartialEq)]
pub struct EmbedArgs {
    /// Attribution file holding `attribution` and `label` datasets
    pub attribution: PathBuf,

    /// Only embed samples with these labels, comma separated
    #[arg(long, value_delimiter = ',')]
    pub label_filter: Option<Vec<u32>>,

    /// Number of eigenpairs to keep
    #[arg(long, default_value_t = 32)]
    pub eigvals: usize,

    /// Neighbours per sample in the affinity graph
    #[arg(long, default_value_t = 10)]
    pub knn: usize,

    /// Distance metric: euclidean, sqeuclidean, cityblock or cosine
    #[arg(long, default_value = "euclidean")]
    pub metric: String,

    /// Average attributions over axis 1 (colour channels) first
    #[arg(long)]
    pub channel_mean: bool,

    /// Rescale feature rows before computing distances
    #[arg(long, value_enum, default_value_t = Preprocess::None)]
    pub preprocess: Preprocess,

    #[command(flatten)]
    pub flags: StageFlags,
}

impl From<EmbedArgs> for EmbedConfig {
    fn from(a: EmbedArgs) -> Self {
        EmbedConfig {
            attribution:  a.attribution,
            label_filter: a.label_filter,
            channel_mean: a.channel_mean,
            preprocess:   a.preprocess,
            metric:       a.metric,
            eigvals:      a.eigvals,
            knn:          a.knn,
        }
    }
}

// ─── cluster ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ClusterArgs {
    /// Number of trailing eigenvector columns to cluster on
    #[arg(long, default_value_t = 8)]
    pub eigvals: usize,

    /// Values of k, comma separated
    #[arg(long, value_delimiter = ',', default_value = "2,3,4,5")]
    pub clusters: Vec<usize>,

    /// File to write labels to (defaults to the data file)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Seed for k-means++ initialisation
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[command(flatten)]
    pub source: SourceFlags,

    #[command(flatten)]
    pub flags: StageFlags,
}

impl From<ClusterArgs> for ClusterConfig {
    fn from(a: ClusterArgs) -> Self {
        ClusterConfig {
            eigvals:  a.eigvals,
            clusters: a.clusters,
            computed: a.source.use_computed(),
            output:   a.output,
            seed:     a.seed,
        }
    }
}

// ─── tsne ─────────────────────────────────────────────────────────────────────

#[derive(Args, Debug, Clone, PartialEq)]
pub struct TsneArgs {
    /// Number of trailing eigenvector columns to project
    #[arg(long, default_value_t = 8)]
    pub eigvals: usize,

    /// File to write the projection to (defaults to the data file)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Effective number of neighbours t-SNE balances
    #[arg(long, default_value_t = 30.0)]
    pub perplexity: f64,

    /// Gradient descent iterations
    #[arg(long, default_value_t = 1000)]
    pub n_iter: usize,

    /// Seed for the initial layout
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[command(flatten)]
    pub source: SourceFlags,

    #[command(flatten)]
    pub flags: StageFlags,
}

impl From<TsneArgs> for TsneConfig {
    fn from(a: TsneArgs) -> Self {
        TsneConfig {
            eigvals:    a.eigvals,
            computed:   a.source.use_computed(),
            output:     a.output,
            perplexity: a.perplexity,
            n_iter:     a.n_iter,
            seed:       a.seed,
        }
    }
}
