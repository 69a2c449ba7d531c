/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

extern crate argh;
extern crate basalt_mqtt;
extern crate csv;
extern crate log;
extern crate rand;
extern crate simplelog;
extern crate tokio;

use argh::FromArgs;
use basalt_mqtt::{convert_u8_to_quality_of_service, ConnectOptions, PublishOptions, QualityOfService, Session, SessionOptions, PORT_TCP_PLAINTEXT};
use log::{debug, info, LevelFilter};
use rand::distributions::Alphanumeric;
use rand::Rng;
use simplelog::*;
use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::net::TcpStream;

#[derive(FromArgs, Debug, PartialEq)]
/// basalt-pub - a small MQTT 3.1.1 publishing tool
struct CommandLineArgs {

    #[argh(subcommand)]
    command: SubCommand,

    /// log level to run at: off, error, warn, info, debug, or trace
    #[argh(option, default = "String::from(\"warn\")")]
    loglevel: String,

    /// path to a log file that should be written instead of logging to stderr
    #[argh(option)]
    logpath: Option<PathBuf>,
}

#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand)]
enum SubCommand {
    Publish(PublishArgs),
}

#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "pub")]
/// publish an MQTT message
struct PublishArgs {

    /// the MQTT broker host to connect to (default 'localhost')
    #[argh(option, short = 'b', default = "String::from(\"localhost\")")]
    broker: String,

    /// the MQTT client name to use - a random id is generated when omitted
    #[argh(option, short = 'c', default = "String::new()")]
    client: String,

    /// file with CSV "topic,message" lines to publish instead of --topic and --message
    #[argh(option, short = 'f')]
    file: Option<PathBuf>,

    /// number of seconds to keep the connection alive
    #[argh(option, default = "10")]
    keep_alive: u16,

    /// the message to send
    #[argh(option, short = 'm', default = "String::new()")]
    message: String,

    /// the MQTT topic to send the message to (default 'test')
    #[argh(option, short = 't', default = "String::from(\"test\")")]
    topic: String,

    /// quality of service 0-2 (default 0)
    #[argh(option, short = 'q', default = "0")]
    qos: u8,

    /// whether the message should be retained
    #[argh(switch, short = 'r')]
    retain: bool,

    /// the will message to send when the disconnect is not clean
    #[argh(option, default = "String::new()")]
    wmessage: String,

    /// quality of service 0-2 for delivery of the will message
    #[argh(option, default = "0")]
    wqos: u8,

    /// whether the will message should be retained
    #[argh(switch)]
    wretain: bool,

    /// the topic for the will message sent when the disconnect is not clean
    #[argh(option, default = "String::new()")]
    wtopic: String,

    /// do not send a DISCONNECT, allowing will delivery to be observed
    #[argh(switch)]
    test_no_disconnect: bool,

    /// two-pass run: publish ignoring PUBACKs, then reconnect non-clean and resend duplicates
    #[argh(switch)]
    test_qos1_resend: bool,

    /// three-pass run exercising the full QoS 2 retransmission sequence
    #[argh(switch)]
    test_qos2_resend: bool,
}

fn validate_publish_args(args: &mut PublishArgs) -> Result<(), String> {
    if args.qos > 2 {
        return Err(format!("--qos must be between 0 and 2, got {}", args.qos));
    }
    if args.wqos > 2 {
        return Err(format!("--wqos must be between 0 and 2, got {}", args.wqos));
    }
    if args.keep_alive > 0xFF {
        return Err(format!("--keep_alive cannot be larger than 255, got {}", args.keep_alive));
    }
    if args.test_qos1_resend && args.test_qos2_resend {
        return Err("--test_qos1_resend and --test_qos2_resend cannot be used at the same time".to_string());
    }
    if args.test_qos1_resend && args.qos != 1 {
        debug!("qos set to 1 since --test_qos1_resend was requested");
        args.qos = 1;
    }
    if args.test_qos2_resend && args.qos != 2 {
        debug!("qos set to 2 since --test_qos2_resend was requested");
        args.qos = 2;
    }
    Ok(())
}

fn init_logging(cli_args: &CommandLineArgs) {
    let level = LevelFilter::from_str(&cli_args.loglevel).unwrap_or_else(|_| {
        eprintln!("unknown loglevel '{}' - using loglevel=warn", cli_args.loglevel);
        LevelFilter::Warn
    });

    if let Some(log_file_path) = &cli_args.logpath {
        match File::create(log_file_path) {
            Ok(log_file) => {
                WriteLogger::init(level, Config::default(), log_file).unwrap();
            }
            Err(error) => {
                eprintln!("could not create log file {}: {}", log_file_path.display(), error);
                std::process::exit(1);
            }
        }
    } else {
        TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto).unwrap();
    }
}

/// A random client id suitable for brokers that require a non-empty identity
fn random_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(22)
        .map(char::from)
        .collect()
}

struct Publisher {
    args: PublishArgs,
    client_name: String,
    qos: QualityOfService,
    will_qos: QualityOfService,
}

impl Publisher {

    fn new(args: PublishArgs) -> Result<Self, Box<dyn Error>> {
        let client_name =
            if args.client.is_empty() {
                let generated = random_client_id();
                info!("using generated client id {}", generated);
                generated
            } else {
                args.client.clone()
            };

        let qos = convert_u8_to_quality_of_service(args.qos)?;
        let will_qos = convert_u8_to_quality_of_service(args.wqos)?;

        Ok(Publisher {
            args,
            client_name,
            qos,
            will_qos,
        })
    }

    async fn dial(&self) -> Result<TcpStream, Box<dyn Error>> {
        let stream = TcpStream::connect((self.args.broker.as_str(), PORT_TCP_PLAINTEXT)).await?;
        Ok(stream)
    }

    fn session(&self, stream: TcpStream) -> Session<TcpStream> {
        let options = SessionOptions::builder()
            .with_client_id(&self.client_name)
            .build();
        Session::new(options, stream)
    }

    fn connect_options(&self, clean_session: bool, ignore_pubacklike: bool, ignore_pubcomp: bool) -> ConnectOptions {
        ConnectOptions::builder()
            .with_keep_alive_seconds(self.args.keep_alive)
            .with_will_topic(&self.args.wtopic)
            .with_will_message(self.args.wmessage.as_bytes())
            .with_will_qos(self.will_qos)
            .with_will_retain(self.args.wretain)
            .with_clean_session(clean_session)
            .with_ignore_pubacklike(ignore_pubacklike)
            .with_ignore_pubcomp(ignore_pubcomp)
            .build()
    }

    async fn publish_one(&self, session: &Session<TcpStream>, topic: &str, message: &[u8], retain: bool) -> Result<(), Box<dyn Error>> {
        session.publish(PublishOptions::builder()
            .with_topic(topic)
            .with_message(message)
            .with_qos(self.qos)
            .with_retain(retain)
            .build()).await?;
        Ok(())
    }

    async fn publish_given_message(&self, session: &Session<TcpStream>) -> Result<(), Box<dyn Error>> {
        match &self.args.file {
            Some(file_name) => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .from_path(file_name)?;
                for record in reader.records() {
                    let record = record?;
                    let topic = record.get(0).ok_or("csv rows must contain a topic and a message")?;
                    let message = record.get(1).ok_or("csv rows must contain a topic and a message")?;
                    self.publish_one(session, topic, message.as_bytes(), false).await?;
                }
            }
            None => {
                self.publish_one(session, &self.args.topic, self.args.message.as_bytes(), self.args.retain).await?;
            }
        }
        Ok(())
    }

    async fn disconnect(&self, session: &Session<TcpStream>) -> Result<(), Box<dyn Error>> {
        if self.args.test_no_disconnect {
            session.disconnect_without_message(1).await?;
        } else {
            session.disconnect(1).await?;
        }
        Ok(())
    }

    async fn standard_publish(&self) -> Result<(), Box<dyn Error>> {
        let stream = self.dial().await?;
        let session = self.session(stream);

        session.connect(self.connect_options(true, false, false)).await?;
        self.publish_given_message(&session).await?;
        self.disconnect(&session).await?;

        Ok(())
    }

    async fn qos1_resend_publish(&self) -> Result<(), Box<dyn Error>> {
        // first pass: PUBACKs are ignored, everything published stays in flight
        let stream = self.dial().await?;
        let session = self.session(stream);

        session.connect(self.connect_options(true, true, false)).await?;
        self.publish_given_message(&session).await?;
        self.disconnect(&session).await?;

        // second pass: resume the session, resending duplicates, and process the acks
        let stream = self.dial().await?;
        session.reestablish(stream).await;
        session.connect(self.connect_options(false, false, false)).await?;
        self.disconnect(&session).await?;

        Ok(())
    }

    async fn qos2_resend_publish(&self) -> Result<(), Box<dyn Error>> {
        // first pass: PUBRECs are ignored (the pubacklike switch covers both ack kinds)
        let stream = self.dial().await?;
        let session = self.session(stream);

        session.connect(self.connect_options(true, true, false)).await?;
        self.publish_given_message(&session).await?;
        self.disconnect(&session).await?;

        // second pass: the publish is resent as a duplicate and answered with a PUBREC; the
        // closing PUBCOMP is ignored, leaving a PUBREL in flight
        let stream = self.dial().await?;
        session.reestablish(stream).await;
        session.connect(self.connect_options(false, false, true)).await?;
        self.disconnect(&session).await?;

        // third pass: the PUBREL is resent and the exchange completes
        let stream = self.dial().await?;
        session.reestablish(stream).await;
        session.connect(self.connect_options(false, false, false)).await?;
        self.disconnect(&session).await?;

        Ok(())
    }

    async fn run(&self) -> Result<(), Box<dyn Error>> {
        if self.args.test_qos1_resend {
            self.qos1_resend_publish().await
        } else if self.args.test_qos2_resend {
            self.qos2_resend_publish().await
        } else {
            self.standard_publish().await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli_args: CommandLineArgs = argh::from_env();
    init_logging(&cli_args);

    let SubCommand::Publish(mut args) = cli_args.command;
    if let Err(message) = validate_publish_args(&mut args) {
        eprintln!("{}", message);
        std::process::exit(1);
    }

    let result =
        match Publisher::new(args) {
            Ok(publisher) => publisher.run().await,
            Err(error) => Err(error),
        };

    if let Err(error) = result {
        eprintln!("basalt-pub: {}", error);
        std::process::exit(1);
    }
}
