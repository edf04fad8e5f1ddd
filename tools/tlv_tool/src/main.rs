extern crate clap;
use clap::{App, Arg};
use log::error;
use matter_tlv::tlv;
use simple_logger::SimpleLogger;
use std::process;

fn parse_bytes(input: &str, base: u32) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for byte in input.split(|c: char| c == ' ' || c == ',').filter(|b| !b.is_empty()) {
        let digits = byte.strip_prefix("0x").unwrap_or(byte);
        match u8::from_str_radix(digits, base) {
            Ok(b) => bytes.push(b),
            Err(_) => return Err(format!("Error parsing input byte: {}", byte)),
        }
    }
    Ok(bytes)
}

fn main() {
    if let Err(e) = SimpleLogger::new()
        .with_level(log::LevelFilter::Trace)
        .with_colors(true)
        .without_timestamps()
        .init()
    {
        eprintln!("Failed to set up logging: {}", e);
    }

    let m = App::new("tlv_tool")
        .about("Dumps a Matter TLV encoded byte list")
        .arg(
            Arg::with_name("hex")
                .short("x")
                .long("hex")
                .help("The input is in Hexadecimal (Default)"),
        )
        .arg(
            Arg::with_name("dec")
                .short("d")
                .long("dec")
                .conflicts_with("hex")
                .help("The input is in Decimal"),
        )
        .arg(Arg::with_name("tlvs").help("List of TLVs").required(true))
        .get_matches();

    // Assume hexadecimal by-default
    let base = if m.is_present("dec") { 10 } else { 16 };

    let bytes = match parse_bytes(m.value_of("tlvs").unwrap_or_default(), base) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    tlv::print_tlv_list(&bytes);
    match tlv::parse(&bytes) {
        Ok(root) => println!("{}", root),
        Err(e) => {
            error!("Decoding failed: {}", e);
            process::exit(1);
        }
    }
}
