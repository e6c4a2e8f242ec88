use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

use crate::{Error, Result};

const POD_NAMESPACE_ARG: &str = "K8S_POD_NAMESPACE";
const POD_NAME_ARG: &str = "K8S_POD_NAME";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Possible values are ADD, DEL, CHECK, VERSION
    #[arg(long, env = "CNI_COMMAND", value_parser = parse_command)]
    pub command: Command,

    /// Container ID
    #[arg(long, env = "CNI_CONTAINERID")]
    pub container_id: Option<String>,

    /// Path to the network namespace
    #[arg(long, env = "CNI_NETNS")]
    pub net_ns: Option<PathBuf>,

    /// Name of the interface inside the container
    #[arg(long, env = "CNI_IFNAME")]
    pub ifname: Option<String>,

    /// Key-value pairs separated by semi-colons
    #[arg(long, env = "CNI_ARGS", value_parser = parse_key_value, default_value = "")]
    pub args: BTreeMap<String, String>,

    /// List of paths to search
    #[arg(long, env = "CNI_PATH")]
    pub paths: Option<String>,
}

impl Args {
    pub fn container_id(&self) -> Result<&str> {
        match self.container_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(Error::InvalidRequiredEnvVariables(
                "CNI_CONTAINERID is required".into(),
            )),
        }
    }

    pub fn pod_namespace(&self) -> Option<String> {
        self.args.get(POD_NAMESPACE_ARG).cloned()
    }

    pub fn pod_name(&self) -> Option<String> {
        self.args.get(POD_NAME_ARG).cloned()
    }

    pub fn net_ns(&self) -> Option<String> {
        self.net_ns
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned())
    }
}

fn parse_key_value(s: &str) -> Result<BTreeMap<String, String>> {
    let mut kv = BTreeMap::new();

    if s.is_empty() {
        return Ok(kv);
    };

    for split in s.split(';') {
        if let Some((k, v)) = split.split_once('=') {
            kv.insert(k.to_owned(), v.to_owned());
        }
    }

    Ok(kv)
}

fn parse_command(s: &str) -> Result<Command> {
    let cmd = match s {
        "ADD" => Command::Add,
        "DEL" => Command::Delete,
        "CHECK" => Command::Check,
        "VERSION" => Command::Version,
        _ => return Err(Error::Parse(format!("command {s} not supported"))),
    };
    Ok(cmd)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Add,
    Delete,
    Check,
    Version,
}
