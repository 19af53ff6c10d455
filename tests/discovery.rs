//! chain discovery on a simulated segment: scanning, identification, selection

use etherflow::{
    sim::{SimChain, SimDevice},
    AlState, DeviceIdentity, Error, SelectionFilter, Session,
    };

fn identity(product: u32, serial: u32) -> DeviceIdentity {
    DeviceIdentity {vendor: 0xe7f, product, revision: 1, serial}
}

/// a coupler followed by two servo drives, one carrying a preset alias
fn chain() -> SimChain {
    let chain = SimChain::new();
    chain.push(SimDevice::new(identity(0x1000, 11))
        .description("bus coupler"));
    chain.push(SimDevice::new(identity(0x2001, 22))
        .alias(0x0007)
        .description("axis left")
        .servo());
    chain.push(SimDevice::new(identity(0x2001, 33))
        .description("axis right")
        .servo());
    chain
}

#[tokio::test]
async fn scan_identifies_every_device() {
    let chain = chain();
    let mut session = Session::new(chain.socket());
    assert_eq!(session.scan().await.unwrap(), 3);

    let devices: Vec<_> = session.devices().collect();
    assert_eq!(devices.len(), 3);
    for (position, device) in devices.iter().enumerate() {
        assert_eq!(usize::from(device.position), position);
        assert_eq!(device.state, AlState::Init);
        // every device got a unique fixed address
        assert_eq!(chain.fixed_address(device.position), device.address);
    }
    assert_eq!({devices[0].identity.serial}, 11);
    assert_eq!(devices[0].description.as_deref(), Some("bus coupler"));
    assert_eq!(devices[1].alias, 0x0007);
    assert_eq!({devices[2].identity.product}, 0x2001);
}

#[tokio::test]
async fn scan_sees_only_reachable_devices() {
    let chain = chain();
    // the chain is cut after the second device
    chain.set_online(2, false);
    let mut session = Session::new(chain.socket());
    assert_eq!(session.scan().await.unwrap(), 2);
}

#[tokio::test]
async fn rescan_needs_a_reset() {
    let chain = chain();
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();
    assert!(matches!(session.scan().await, Err(Error::AlreadyScanned)));

    session.reset().await.unwrap();
    assert!(session.registry().is_empty());
    assert_eq!(session.scan().await.unwrap(), 3);
    // aliases survive a reset, they live in non-volatile memory
    assert_eq!(session.registry().get(1).unwrap().alias, 0x0007);
}

#[tokio::test]
async fn selection_filters() {
    let chain = chain();
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();

    // ordinal is decisive
    let device = session.find(&SelectionFilter {
        number: Some(2),
        ..Default::default()
        }).unwrap();
    assert_eq!({device.identity.serial}, 33);

    // decisive even against criteria that would exclude the device
    let device = session.find(&SelectionFilter {
        number: Some(0),
        alias: Some(0x0007),
        description: Some("axis".into()),
        ..Default::default()
        }).unwrap();
    assert_eq!(device.position, 0);

    // an ordinal past the chain end matches nothing
    assert!(matches!(
        session.find(&SelectionFilter {
            number: Some(5),
            ..Default::default()
            }),
        Err(Error::NotFound),
        ));

    let device = session.find(&SelectionFilter {
        alias: Some(0x0007),
        ..Default::default()
        }).unwrap();
    assert_eq!(device.position, 1);

    let device = session.find(&SelectionFilter {
        description: Some("axis right".into()),
        ..Default::default()
        }).unwrap();
    assert_eq!({device.identity.serial}, 33);

    // criteria combine conjunctively
    assert!(matches!(
        session.find(&SelectionFilter {
            alias: Some(0x0007),
            description: Some("axis right".into()),
            ..Default::default()
            }),
        Err(Error::NotFound),
        ));
}
