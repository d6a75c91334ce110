//! usb-serial
//!
//! Lists USB serial adapters and talks to them without a kernel driver.

mod config;
mod target;

use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use common::logging::verbosity_level;
use common::{SerialEvent, UsbHost, setup_logging};
use config::CliConfig;
use protocol::hexdump::{dump_hex_string, from_hex_string};
use protocol::{DataBits, Parity, StopBits};
use serial::drivers::factory_for;
use serial::usb::RusbHost;
use serial::{ProbeTable, SerialInputManager, SerialPort, UsbSerialProber};
use std::io::Write;
use std::sync::Arc;
use target::{DeviceSelector, select_driver};
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-serial")]
#[command(author, version, about = "USB serial adapters from user space")]
#[command(long_about = "
Drives CDC-ACM, FTDI, CP210x, CH34x, Chrome CCD and Unisoc GSM modem serial
adapters directly through libusb.

EXAMPLES:
    # List every supported adapter and its ports
    usb-serial list

    # Print everything the only attached adapter sends
    usb-serial monitor --baud 9600

    # Send an AT command to port 0 of the adapter at bus 1, address 7
    usb-serial send --device 1/7 'AT\\r'

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-serial/config.toml
    3. /etc/usb-serial/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Raise the log level once per occurrence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported adapters and their ports
    List,
    /// Print data received from a port until Ctrl+C
    Monitor {
        #[command(flatten)]
        port: PortArgs,

        /// Print a hex dump instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
    /// Write data to a port
    Send {
        #[command(flatten)]
        port: PortArgs,

        /// Interpret DATA as hex bytes ("41 54 0D")
        #[arg(long)]
        hex: bool,

        /// Data to send; `\r`, `\n` and `\t` escapes are expanded
        data: String,
    },
}

#[derive(ClapArgs, Debug)]
struct PortArgs {
    /// Device as BUS/ADDRESS or VID:PID
    #[arg(short, long, value_name = "DEVICE")]
    device: Option<DeviceSelector>,

    /// Port index on the device
    #[arg(short, long, default_value_t = 0)]
    port: usize,

    #[arg(short, long)]
    baud: Option<u32>,

    /// 5, 6, 7 or 8
    #[arg(long)]
    data_bits: Option<u8>,

    /// 1, 1.5 or 2
    #[arg(long)]
    stop_bits: Option<StopBits>,

    /// none, odd, even, mark or space
    #[arg(long)]
    parity: Option<Parity>,

    /// Assert DTR after opening
    #[arg(long)]
    dtr: bool,

    /// Assert RTS after opening
    #[arg(long)]
    rts: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let base_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    let log_level = verbosity_level(base_level, args.verbose);
    setup_logging(&log_level).context("Failed to setup logging")?;

    info!("usb-serial v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let host = RusbHost::new().context("Failed to initialize libusb")?;
    let prober = build_prober(&config)?;

    match args.command.unwrap_or(Command::List) {
        Command::List => list(&host, &prober),
        Command::Monitor { port, hex } => monitor(&host, &prober, &config, &port, hex).await,
        Command::Send { port, hex, data } => {
            let bytes = if hex {
                from_hex_string(&data).map_err(|e| anyhow!("Invalid hex data: {}", e))?
            } else {
                unescape(&data)
            };
            send(&host, &prober, &config, &port, &bytes).await
        }
    }
}

/// Default probe table plus the products from the config file
fn build_prober(config: &CliConfig) -> Result<UsbSerialProber> {
    let mut table = ProbeTable::with_default_drivers();
    for (id, kind) in config.product_ids()? {
        debug!("Custom product {:04x}:{:04x} -> {}", id.vid, id.pid, kind);
        table.add_product(id.vid, id.pid, factory_for(kind));
    }
    Ok(UsbSerialProber::new(table))
}

fn list(host: &RusbHost, prober: &UsbSerialProber) -> Result<()> {
    let drivers = prober
        .find_all_drivers(host)
        .context("Failed to enumerate USB devices")?;
    if drivers.is_empty() {
        println!("No supported serial devices found");
        return Ok(());
    }

    for driver in &drivers {
        let device = driver.device();
        let (manufacturer, product) = host.strings(device).unwrap_or_default();
        println!(
            "{:03}/{:03} {:04x}:{:04x} {} {} [{}]",
            device.bus_number,
            device.address,
            device.vendor_id,
            device.product_id,
            manufacturer.as_deref().unwrap_or("-"),
            product.as_deref().unwrap_or("-"),
            driver.kind()
        );
        for (index, port) in driver.ports().iter().enumerate() {
            println!("    port {}: {}", index, port);
        }
    }
    Ok(())
}

/// Find, open and configure the requested port
fn open_port(
    host: &RusbHost,
    prober: &UsbSerialProber,
    config: &CliConfig,
    args: &PortArgs,
) -> Result<Arc<SerialPort>> {
    let drivers = prober
        .find_all_drivers(host)
        .context("Failed to enumerate USB devices")?;
    let driver = select_driver(drivers, args.device.as_ref())?;
    let port = driver
        .port(args.port)
        .cloned()
        .ok_or_else(|| anyhow!("{} has no port {}", driver.device(), args.port))?;

    let connection = host
        .open(port.device())
        .with_context(|| format!("Failed to open {}", port.device()))?;
    port.open(connection)
        .with_context(|| format!("Failed to open port {}", args.port))?;

    if let Err(e) = configure(&port, config, args) {
        if let Err(close_err) = port.close() {
            debug!("Closing port after failed setup: {}", close_err);
        }
        return Err(e);
    }
    info!("Opened {}", port);
    Ok(port)
}

fn configure(port: &SerialPort, config: &CliConfig, args: &PortArgs) -> Result<()> {
    let mut settings = config.serial.line_settings()?;
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    if let Some(bits) = args.data_bits {
        settings.data_bits = DataBits::try_from(bits).map_err(|e| anyhow!("{}", e))?;
    }
    if let Some(stop_bits) = args.stop_bits {
        settings.stop_bits = stop_bits;
    }
    if let Some(parity) = args.parity {
        settings.parity = parity;
    }

    match port.set_parameters(&settings) {
        Ok(()) => info!("Line settings {}", settings),
        // bulk-only ports have no line settings
        Err(common::Error::Unsupported(msg)) => debug!("Line settings skipped: {}", msg),
        Err(e) => return Err(e).context("Failed to set line settings"),
    }

    let dtr = args.dtr || config.serial.dtr;
    let rts = args.rts || config.serial.rts;
    if dtr {
        port.set_dtr(true).context("Failed to set DTR")?;
    }
    if rts {
        port.set_rts(true).context("Failed to set RTS")?;
    }
    Ok(())
}

async fn monitor(
    host: &RusbHost,
    prober: &UsbSerialProber,
    config: &CliConfig,
    args: &PortArgs,
    hex: bool,
) -> Result<()> {
    let port = open_port(host, prober, config, args)?;

    let mut reader = SerialInputManager::new(port.clone())
        .with_read_timeout(config.serial.read_timeout());
    if let Some(size) = config.serial.buffer_size {
        reader = reader.with_buffer_size(size);
    }
    let events = reader
        .start(config.serial.channel_capacity)
        .context("Failed to start reader")?;
    info!("Monitoring {}. Press Ctrl+C to stop.", port);

    let mut stdout = std::io::stdout();
    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SerialEvent::Data(data)) => {
                    if hex {
                        writeln!(stdout, "{}", dump_hex_string(&data))?;
                    } else {
                        stdout.write_all(&data)?;
                    }
                    stdout.flush()?;
                }
                Ok(SerialEvent::Error(msg)) => {
                    error!("Reader stopped: {}", msg);
                    break Err(anyhow!("Read failed: {}", msg));
                }
                Err(_) => break Ok(()),
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break Ok(());
            }
        }
    };

    drop(events);
    reader.stop();
    tokio::task::spawn_blocking(move || reader.join())
        .await
        .context("Reader join failed")?;
    if port.is_open()
        && let Err(e) = port.close()
    {
        warn!("Failed to close port: {}", e);
    }
    result
}

async fn send(
    host: &RusbHost,
    prober: &UsbSerialProber,
    config: &CliConfig,
    args: &PortArgs,
    data: &[u8],
) -> Result<()> {
    let port = open_port(host, prober, config, args)?;
    let timeout = config.serial.write_timeout();
    let payload = data.to_vec();
    let writer = port.clone();

    // USB transfers block, keep them off the runtime threads
    let result = tokio::task::spawn_blocking(move || writer.write(&payload, timeout))
        .await
        .context("Writer task failed")?;
    if let Err(e) = port.close() {
        warn!("Failed to close port: {}", e);
    }

    match result {
        Ok(()) => {
            info!("Sent {} bytes", data.len());
            Ok(())
        }
        Err(e) => {
            if let Some(sent) = e.bytes_transferred() {
                warn!("Only {} of {} bytes were sent", sent, data.len());
            }
            Err(e).context("Write failed")
        }
    }
}

/// Expand `\r`, `\n`, `\t`, `\\` and `\xNN` escapes into raw bytes
fn unescape(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.chars();
    let mut utf8 = [0u8; 4];
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            continue;
        }
        match chars.next() {
            Some('r') => out.push(b'\r'),
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('\\') => out.push(b'\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) => out.push(b),
                    Err(_) => {
                        out.extend_from_slice(b"\\x");
                        out.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            Some(other) => {
                out.push(b'\\');
                out.extend_from_slice(other.encode_utf8(&mut utf8).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("AT\\r\\n"), b"AT\r\n");
        assert_eq!(unescape("a\\tb\\\\"), b"a\tb\\");
        assert_eq!(unescape("\\x41\\x7e"), b"A~");
        assert_eq!(unescape("\\q\\"), b"\\q\\");
        assert_eq!(unescape("\\xZZ"), b"\\xZZ");
    }

    #[test]
    fn test_unescape_high_bytes_are_raw() {
        assert_eq!(unescape("\\xFF\\x80"), vec![0xff, 0x80]);
        assert_eq!(unescape("\\x02ok\\x03"), b"\x02ok\x03");
        // literal non-ASCII text stays UTF-8
        assert_eq!(unescape("é"), "é".as_bytes());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "usb-serial",
            "-vv",
            "send",
            "--device",
            "0403:6001",
            "--baud",
            "9600",
            "--parity",
            "even",
            "--stop-bits",
            "2",
            "AT\\r",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        match args.command {
            Some(Command::Send { port, hex, data }) => {
                assert!(!hex);
                assert_eq!(data, "AT\\r");
                assert_eq!(port.baud, Some(9600));
                assert_eq!(port.parity, Some(Parity::Even));
                assert_eq!(port.stop_bits, Some(StopBits::Two));
                assert!(matches!(port.device, Some(DeviceSelector::Id(_))));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_build_prober_with_custom_products() {
        let mut config = CliConfig::default();
        config.products.push(config::ProductEntry {
            id: "1209:2301".to_string(),
            driver: serial::DriverKind::Ftdi,
        });
        let prober = build_prober(&config).unwrap();
        assert_eq!(prober.table().product_count(), 14);
    }
}
