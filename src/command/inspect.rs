use crate::command;
use crate::gate::{ClientCertificate, ClientRequest, Gate, Outcome};
use argh::FromArgs;
use serde::Serialize;
use std::fs;
use tracing::debug;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "inspect",
    description = "Run a PEM client certificate through the gate and print the outcome"
)]
pub struct Options {
    #[argh(option)]
    /// path to the PEM encoded client certificate
    pub certificate: String,

    #[argh(option, default = "String::from(\"GET\")")]
    /// request method to authorize, defaults to `GET`
    pub method: String,

    #[argh(option, default = "String::from(\"/\")")]
    /// request path to authorize, defaults to `/`
    pub path: String,
}

#[derive(Serialize)]
struct Report<'a> {
    certificate: &'a ClientCertificate,
    thumbprint: String,
    #[serde(flatten)]
    outcome: Outcome,
}

pub struct Command {
    certificate: ClientCertificate,
    request: ClientRequest,
    gate: Gate,
}

impl Command {
    pub fn new(options: &Options, gate: Gate) -> Result<Command, command::Error> {
        let pem = fs::read(&options.certificate)?;
        let certificate = ClientCertificate::from_pem(&pem)?;
        debug!(
            thumbprint = %certificate.thumbprint(),
            "Loaded certificate from {}", options.certificate
        );

        Ok(Command {
            certificate,
            request: ClientRequest::new(options.method.as_str(), options.path.as_str()),
            gate,
        })
    }

    pub fn evaluate(&self) -> Outcome {
        self.gate
            .evaluate_certificate(&self.request, Some(&self.certificate))
    }

    pub fn run(&self) -> Result<(), command::Error> {
        let report = Report {
            certificate: &self.certificate,
            thumbprint: self.certificate.thumbprint(),
            outcome: self.evaluate(),
        };

        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
