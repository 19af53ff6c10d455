//! bring one simulated servo drive to operation and run a short motion
//! sequence: homing, two positioning moves, then a crawl.
//!
//!     cargo run --example single_servo

use std::time::Duration;
use etherflow::{
    motion::SERVO_LAYOUT,
    sim::{SimChain, SimDevice},
    AlState, Axis, AxisState, Cyclic, DeviceIdentity, Session,
    };

/// period of the exchange loop
const PERIOD: Duration = Duration::from_millis(2);

#[tokio::main]
async fn main() -> etherflow::Result<()> {
    env_logger::init();

    let chain = SimChain::new();
    chain.push(SimDevice::new(DeviceIdentity {vendor: 0xe7f, product: 0x2001, revision: 2, serial: 1})
        .description("servo drive")
        .servo());

    let mut session = Session::new(chain.socket());
    session.scan().await?;
    let map = session.configure_images(&[(0, SERVO_LAYOUT)]).await?;
    session.request_state(0, AlState::Operational).await?;
    println!("drive is operational");

    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);
    let mut period = tokio::time::interval(PERIOD);

    axis.enable()?;
    wait_for(&mut cyclic, &mut axis, &mut period, AxisState::Ready).await?;
    axis.start_homing()?;
    wait_for(&mut cyclic, &mut axis, &mut period, AxisState::Homed).await?;
    println!("homed at {}", axis.actual());

    for target in [80_000, -20_000] {
        axis.move_absolute(target)?;
        wait_for(&mut cyclic, &mut axis, &mut period, AxisState::TargetReached).await?;
        println!("reached {}", axis.actual());
    }

    axis.jog(500)?;
    for _ in 0 .. 100 {
        period.tick().await;
        cyclic.exchange().await?;
        axis.poll(&mut cyclic)?;
    }
    axis.jog_stop()?;
    println!("crawled to {}", axis.actual());

    axis.disable();
    wait_for(&mut cyclic, &mut axis, &mut period, AxisState::Disabled).await?;
    session.close();
    Ok(())
}

/// run the cyclic loop until the axis reports the wanted state
async fn wait_for(
        cyclic: &mut Cyclic<'_>,
        axis: &mut Axis,
        period: &mut tokio::time::Interval,
        target: AxisState,
        ) -> etherflow::Result<()> {
    loop {
        period.tick().await;
        cyclic.exchange().await?;
        if axis.poll(cyclic)? == target {
            return Ok(());
        }
    }
}
