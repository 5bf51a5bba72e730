//! Device inquiry example

use esci::Device;
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

    let mut device = Device::new(channel);
    device.inquire().await?;

    println!("Firmware:        {}", device.firmware);
    println!(
        "Command level:   {}",
        String::from_utf8_lossy(&device.command_level)
    );
    println!("Base resolution: {} dpi", device.base_resolution);
    println!("Optical offset:  {} lines", device.optical_offset);

    for (label, ext) in [
        ("Flatbed", &device.flatbed),
        ("ADF", &device.adf),
        ("TPU", &device.tpu),
    ] {
        match ext {
            Some(ext) => println!("{label}: {}x{} px, {}", ext.max_pixels.0, ext.max_pixels.1, ext.area),
            None => println!("{label}: not installed"),
        }
    }

    device.close().await?;
    Ok(())
}
