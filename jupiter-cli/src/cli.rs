use clap::Parser;
use std::path::PathBuf;

/// Download series and movies from ERR Jupiter.
#[derive(Parser, Debug)]
#[command(name = "jupiter", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ./config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Look for seasons of configured series that are not configured yet
    #[arg(long)]
    pub discover: bool,

    /// Append discovered season URLs to the configuration file
    #[arg(long, requires = "discover")]
    pub add: bool,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn add_requires_discover() {
        assert!(Args::try_parse_from(["jupiter", "--add"]).is_err());
        let args = Args::try_parse_from(["jupiter", "--discover", "--add"]).unwrap();
        assert!(args.discover && args.add);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["jupiter", "-v", "-q"]).is_err());
    }
}
