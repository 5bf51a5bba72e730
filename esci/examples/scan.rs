//! Scan a gray A4 page at 300 dpi and write it as a PGM file

use std::io::Write;

use esci::{Device, ScanOptions, ScanSession};
use esci_transport::{channel_for, InterpreterRegistry};

#[tokio::main]
async fn main() -> esci::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "usb:".to_string());

    let registry = InterpreterRegistry::new();
    let mut channel = channel_for(&name, &registry)?;
    channel.open().await?;

    let mut session = ScanSession::new(Device::new(channel), ScanOptions::default())?;
    session.start().await?;

    let p = *session.parameters().expect("parameters set after start");
    println!("Scanning {}x{} px", p.pixels_per_line, p.lines);

    let mut image = Vec::with_capacity(p.total_bytes());
    let mut buf = vec![0u8; 65536];
    loop {
        let n = session.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        image.extend_from_slice(&buf[..n]);
    }
    session.finish().await?;

    let mut file = std::fs::File::create("page.pgm").map_err(esci_transport::Error::from)?;
    write!(file, "P5\n{} {}\n255\n", p.pixels_per_line, p.lines)
        .and_then(|_| file.write_all(&image))
        .map_err(esci_transport::Error::from)?;

    println!("Wrote page.pgm ({} bytes)", image.len());
    Ok(())
}
