/*!
    etherflow is a fieldbus master for chains of industrial devices daisy-chained
    on raw ethernet.

    The [Session] is the entry point: scan the chain, drive the devices through
    their communication states, map their process images, then run the realtime
    exchange with [Cyclic] and command motion axes with [Axis].

    ```no_run
    # async fn example() -> etherflow::Result<()> {
    let mut session = etherflow::Session::new(etherflow::EthernetSocket::new("eth0")?);
    session.scan().await?;
    for device in session.devices() {
        println!("found {:?}", device.identity);
    }
    # Ok(()) }
    ```
*/

pub mod data;
mod error;
pub mod frame;
mod link;
mod device;
mod process;
mod session;
pub mod motion;
pub mod registers;
pub mod sim;
mod socket;

pub use crate::error::{Error, Result};
pub use crate::link::{Answer, DeviceAddress, Link};
pub use crate::device::{Device, Registry, SelectionFilter};
pub use crate::process::{Cycle, Cyclic, ProcessLayout, ProcessMap, DEFAULT_LOST_THRESHOLD};
pub use crate::session::Session;
pub use crate::motion::{Axis, AxisState};
pub use crate::registers::{AlError, AlState, DeviceIdentity};
pub use crate::socket::*;
