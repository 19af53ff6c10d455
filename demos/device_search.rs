//! scan a chain and print a record for every device found.
//!
//! With an interface name as argument the scan runs on the real segment,
//! without one it runs on a small simulated chain:
//!
//!     cargo run --example device_search [interface]

use etherflow::{
    sim::{SimChain, SimDevice},
    DeviceIdentity, Session,
    };

/// chain used when no interface is given
fn simulated() -> SimChain {
    let chain = SimChain::new();
    chain.push(SimDevice::new(DeviceIdentity {vendor: 0xe7f, product: 0x1000, revision: 1, serial: 501})
        .description("bus coupler"));
    chain.push(SimDevice::new(DeviceIdentity {vendor: 0xe7f, product: 0x2001, revision: 2, serial: 502})
        .alias(0x0007)
        .description("servo drive")
        .servo());
    chain
}

#[tokio::main]
async fn main() -> etherflow::Result<()> {
    env_logger::init();

    let mut session = match std::env::args().nth(1) {
        #[cfg(target_os = "linux")]
        Some(interface) => Session::new(etherflow::EthernetSocket::new(&interface)?),
        #[cfg(not(target_os = "linux"))]
        Some(_) => return Err(etherflow::Error::Master("raw ethernet sockets need linux")),
        None => Session::new(simulated().socket()),
    };

    let found = session.scan().await?;
    println!("{} devices on the chain\n", found);
    for device in session.devices() {
        println!("position: {}", device.position);
        println!("address:  0x{:04x}", device.address);
        if device.alias != 0 {
            println!("alias:    0x{:04x}", device.alias);
        }
        println!("vendor:   0x{:08x}", {device.identity.vendor});
        println!("product:  0x{:08x}", {device.identity.product});
        println!("revision: {}", {device.identity.revision});
        println!("serial:   {}", {device.identity.serial});
        if let Some(description) = &device.description {
            println!("name:     {}", description);
        }
        println!();
    }
    session.close();
    Ok(())
}
