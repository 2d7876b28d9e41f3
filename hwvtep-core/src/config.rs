//! controller configs

pub mod cli {
    //! Parse from either cli or env var

    /// default id of this controller instance
    pub const DEFAULT_INSTANCE_ID: &str = "hwvtep-controller";
    /// ownership entity type for devices
    pub const DEFAULT_ENTITY_TYPE: &str = "hwvtep";
    /// database holding the device's configuration
    pub const DEFAULT_DATABASE: &str = "hardware_vtep";
    /// table whose single row identifies a device
    pub const DEFAULT_GLOBAL_TABLE: &str = "Global";
    /// Default channel size for mpsc chans
    pub const DEFAULT_CHANNEL_SIZE: usize = 10_000;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "hwvtep-worker";
    /// default log level. Can use this argument or HWVTEP_LOG env var
    pub const DEFAULT_HWVTEP_LOG: &str = "info";

    use std::io;

    pub use clap::Parser;
    use tokio::runtime::{Builder, Runtime};

    use super::DeviceSettings;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "hwvtep", bin_name = "hwvtep", about, long_about = None)]
    /// parses from cli & environment var
    pub struct Config {
        /// ID of this controller instance in the cluster
        #[clap(long, env, value_parser, default_value = DEFAULT_INSTANCE_ID)]
        pub instance_id: String,
        /// entity type used for device ownership
        #[clap(long, env, value_parser, default_value = DEFAULT_ENTITY_TYPE)]
        pub entity_type: String,
        /// device database name
        #[clap(long, env, value_parser, default_value = DEFAULT_DATABASE)]
        pub database: String,
        /// table queried to identify a device with no known node id
        #[clap(long, env, value_parser, default_value = DEFAULT_GLOBAL_TABLE)]
        pub global_table: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_HWVTEP_LOG)]
        pub hwvtep_log: String,
        /// channel size for various mpsc chans
        #[clap(long, env, value_parser, default_value_t = DEFAULT_CHANNEL_SIZE)]
        pub channel_size: usize,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of worker threads, defaults to the number of logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
    }

    impl Config {
        /// settings for the device manager
        pub fn settings(&self) -> DeviceSettings {
            DeviceSettings {
                member: self.instance_id.clone(),
                entity_type: self.entity_type.clone(),
                database: self.database.clone(),
                global_table: self.global_table.clone(),
            }
        }

        /// multi-threaded runtime named and sized from this config
        pub fn runtime(&self) -> io::Result<Runtime> {
            let mut builder = Builder::new_multi_thread();
            builder.thread_name(&self.thread_name).enable_all();
            if let Some(num) = self.threads {
                builder.worker_threads(num);
            }
            builder.build()
        }
    }
}

pub mod trace {
    //! Global subscriber setup for the embedding process
    use std::{fmt as std_fmt, str::FromStr};

    use anyhow::Result;
    use thiserror::Error;
    use tracing_subscriber::{
        Layer, Registry,
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use crate::env::parse_var_with_err;

    /// variable selecting the output format
    pub const FORMAT_VAR: &str = "LOG_FORMAT";

    /// Shape of emitted log lines.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub enum LogFormat {
        /// one json object per event
        Json,
        /// multi-line, human oriented
        Pretty,
        /// single-line text
        #[default]
        Standard,
    }

    /// a format name other than json, pretty or standard
    #[derive(Debug, Error)]
    #[error("unknown log format {0:?}")]
    pub struct UnknownFormat(String);

    impl FromStr for LogFormat {
        type Err = UnknownFormat;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "json" => Ok(Self::Json),
                "pretty" => Ok(Self::Pretty),
                "standard" | "" => Ok(Self::Standard),
                other => Err(UnknownFormat(other.to_owned())),
            }
        }
    }

    impl std_fmt::Display for LogFormat {
        fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
            f.write_str(match self {
                Self::Json => "json",
                Self::Pretty => "pretty",
                Self::Standard => "standard",
            })
        }
    }

    impl LogFormat {
        fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
            match self {
                Self::Json => fmt::layer().json().boxed(),
                Self::Pretty => fmt::layer()
                    .event_format(Format::default().pretty().with_source_location(false))
                    .fmt_fields(PrettyFields::new())
                    .boxed(),
                Self::Standard => fmt::layer().boxed(),
            }
        }
    }

    /// Installed logging setup.
    #[derive(Debug)]
    pub struct Config {
        /// format read from [`FORMAT_VAR`]
        pub format: LogFormat,
    }

    impl Config {
        /// Sets the process-wide subscriber filtered by `directives`. Invalid
        /// directives fall back to `info`. Fails if a subscriber is already set.
        pub fn parse(directives: &str) -> Result<Self> {
            let format: LogFormat = parse_var_with_err(FORMAT_VAR, LogFormat::default())?;
            let filter = EnvFilter::try_new(directives).or_else(|_| EnvFilter::try_new("info"))?;

            tracing_subscriber::registry()
                .with(format.layer())
                .with(filter)
                .try_init()?;
            Ok(Self { format })
        }
    }
}

/// Names the device manager works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// this controller's name in the cluster, used in logs
    pub member: String,
    /// entity type registered with the ownership service
    pub entity_type: String,
    /// device database
    pub database: String,
    /// table read to identify a device
    pub global_table: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            member: cli::DEFAULT_INSTANCE_ID.to_owned(),
            entity_type: cli::DEFAULT_ENTITY_TYPE.to_owned(),
            database: cli::DEFAULT_DATABASE.to_owned(),
            global_table: cli::DEFAULT_GLOBAL_TABLE.to_owned(),
        }
    }
}
