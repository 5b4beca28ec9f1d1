use std::io;
use tracing::Level;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "warn,shared=info,wsws_bulletin=info";
const VERBOSE_DIRECTIVES: &str = "warn,shared=debug,wsws_bulletin=debug";

fn directives(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_DIRECTIVES
    } else {
        DEFAULT_DIRECTIVES
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbose` when set.
pub fn init(verbose: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(verbose)));

    // html5ever complains about markup it can still parse
    let quiet_parser = FilterFn::new(|metadata| {
        !(metadata.level() == &Level::WARN && metadata.target().starts_with("html5ever"))
    });

    let stderr_log = fmt::layer()
        .with_writer(io::stderr)
        .with_target(verbose)
        .with_filter(env_filter)
        .with_filter(quiet_parser);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(stderr_log).try_init();
}
