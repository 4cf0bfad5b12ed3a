use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(name = "sqljudge", version)]
pub struct Opts {
    #[clap(subcommand)]
    pub cmd: SubCmd,

    #[clap(flatten)]
    pub opt: GlobalOpts,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file. Built-in defaults are used if omitted.
    #[clap(long, short, global = true, value_name = "config-file-path")]
    pub config: Option<PathBuf>,

    /// Problem catalog, overriding the one named in the configuration file
    #[clap(long, global = true, value_name = "problems-path")]
    pub problems: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCmd {
    /// Run as a long-running HTTP judging service
    #[clap(name = "serve")]
    Serve(ServeSubCmd),

    /// Judge a single query against a problem and print the verdict
    #[clap(name = "check")]
    Check(CheckSubCmd),

    /// List the problems in the catalog
    #[clap(name = "problems")]
    Problems,
}

#[derive(Args, Debug, Clone)]
pub struct ServeSubCmd {
    /// Address to listen on, overriding the configuration file
    #[clap(long, short)]
    pub bind: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckSubCmd {
    /// Slug of the problem to judge against
    #[clap(required = true)]
    pub slug: String,

    /// File containing the query. Use `-` to read from stdin.
    #[clap(name = "query-file", default_value = "-")]
    pub query: PathBuf,
}
