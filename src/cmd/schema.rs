//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;

use crate::{
    async_utils::io::write_json,
    config::PipelineConfig,
    extract::ExtractedFieldRecord,
    pipeline::{CardOutput, DocumentExtraction},
    prelude::*,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// The `--config` file.
    PipelineConfig,
    /// The fields recovered from a PDF.
    ExtractedFieldRecord,
    /// Output of `extract`.
    DocumentExtraction,
    /// Output of `generate`.
    CardOutput,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::PipelineConfig => schema_for!(PipelineConfig),
        SchemaType::ExtractedFieldRecord => schema_for!(ExtractedFieldRecord),
        SchemaType::DocumentExtraction => schema_for!(DocumentExtraction),
        SchemaType::CardOutput => schema_for!(CardOutput),
    };
    write_json(schema_opts.output_path.as_deref(), &schema).await
}
