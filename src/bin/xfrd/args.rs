// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements command-line argument parsing.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{Parser, Subcommand};

use xfrd::class::Class;
use xfrd::name::Name;
use xfrd::xfr::pull::Method;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// DNS zone transfer daemon and client
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch a zone from one or more servers
    Fetch(FetchArgs),

    /// Serve zone transfers
    Serve(ServeArgs),
}

#[derive(Debug, Parser)]
pub struct FetchArgs {
    /// Set the zone to fetch
    #[clap(long, value_name = "NAME")]
    pub zone: Name,

    /// Set the class of the zone
    #[clap(long, default_value = "IN", value_name = "CLASS")]
    pub class: Class,

    /// Set the zone image file to read and update
    #[clap(long, value_name = "PATH")]
    pub file: PathBuf,

    /// Set an IXFR log file to record incremental changes in
    #[clap(long, value_name = "PATH")]
    pub ixfr_log: Option<PathBuf>,

    /// Override the serial of the zone image
    #[clap(long, value_name = "N")]
    pub serial: Option<u32>,

    /// Add a server to try, optionally with the transfer method to use
    #[clap(long = "server", required = true, value_name = "ADDR[:axfr|:ixfr]")]
    pub servers: Vec<ServerSpec>,

    /// Set the port for servers given without one
    #[clap(long, default_value_t = 53, value_name = "PORT")]
    pub port: u16,

    /// Set a TSIG key file to sign requests with
    #[clap(long, value_name = "PATH")]
    pub key_file: Option<PathBuf>,

    /// Set the connection timeout in seconds
    #[clap(long, value_name = "SECONDS")]
    pub connect_timeout: Option<u64>,

    /// Set the timeout for the first message of a response in seconds
    #[clap(long, value_name = "SECONDS")]
    pub first_read_timeout: Option<u64>,

    /// Set the timeout for later messages of a response in seconds
    #[clap(long, value_name = "SECONDS")]
    pub read_timeout: Option<u64>,

    /// Set the timeout for the whole fetch in seconds
    #[clap(long, value_name = "SECONDS")]
    pub total_timeout: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE")]
    pub config: PathBuf,
}

/// A server given with the `--server` option. This is parsed with its
/// [`FromStr`] implementation and accepts an IP address or a socket
/// address, optionally followed by `:axfr` or `:ixfr`:
///
/// * `192.0.2.1`
/// * `192.0.2.1:5353:axfr`
/// * `[2001:db8::1]:ixfr`
///
/// Without an explicit method, IXFR is tried first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSpec {
    pub ip: IpAddr,
    pub port: Option<u16>,
    pub method: Method,
}

impl ServerSpec {
    /// Returns the socket address to connect to, using `default_port`
    /// if no port was given.
    pub fn addr(&self, default_port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, self.port.unwrap_or(default_port))
    }
}

impl FromStr for ServerSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, method) = match s.rsplit_once(':') {
            Some((rest, method)) if method.parse::<Method>().is_ok() => {
                (rest, method.parse::<Method>().map_err(|e| anyhow!(e))?)
            }
            _ => (s, Method::Ixfr),
        };

        if let Ok(ip) = addr.parse::<IpAddr>() {
            Ok(Self {
                ip,
                port: None,
                method,
            })
        } else if let Ok(sa) = addr.parse::<SocketAddr>() {
            Ok(Self {
                ip: sa.ip(),
                port: Some(sa.port()),
                method,
            })
        } else if let Some(ip) = addr
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .and_then(|a| a.parse::<IpAddr>().ok())
        {
            Ok(Self {
                ip,
                port: None,
                method,
            })
        } else {
            Err(anyhow!("invalid server address: {}", addr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_specs_parse() {
        let spec: ServerSpec = "192.0.2.1".parse().unwrap();
        assert_eq!(spec.addr(53), "192.0.2.1:53".parse().unwrap());
        assert_eq!(spec.method, Method::Ixfr);

        let spec: ServerSpec = "192.0.2.1:5353:axfr".parse().unwrap();
        assert_eq!(spec.addr(53), "192.0.2.1:5353".parse().unwrap());
        assert_eq!(spec.method, Method::Axfr);

        let spec: ServerSpec = "[2001:db8::1]:IXFR".parse().unwrap();
        assert_eq!(spec.addr(53), "[2001:db8::1]:53".parse().unwrap());
        assert_eq!(spec.method, Method::Ixfr);

        let spec: ServerSpec = "2001:db8::1".parse().unwrap();
        assert_eq!(spec.port, None);

        let spec: ServerSpec = "[2001:db8::1]:5353".parse().unwrap();
        assert_eq!(spec.port, Some(5353));
    }

    #[test]
    fn bad_server_specs_are_rejected() {
        assert!("ns1.example:axfr".parse::<ServerSpec>().is_err());
        assert!("192.0.2.1:soa".parse::<ServerSpec>().is_err());
    }
}
