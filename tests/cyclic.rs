//! cyclic process-data exchange on a simulated segment

use etherflow::{
    motion::{self, SERVO_LAYOUT},
    sim::{SimChain, SimDevice},
    AlState, Cycle, Cyclic, DeviceIdentity, Error, Session,
    };

fn chain() -> SimChain {
    let chain = SimChain::new();
    for serial in 0 .. 2 {
        chain.push(SimDevice::new(DeviceIdentity {
            vendor: 0xe7f,
            product: 0x2001,
            revision: 1,
            serial,
            }).servo());
    }
    chain
}

/// scan, map both drives and bring them to Operational
async fn bring_up(chain: &SimChain) -> (Session, etherflow::ProcessMap) {
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();
    let map = session.configure_images(&[
        (0, SERVO_LAYOUT),
        (1, SERVO_LAYOUT),
        ]).await.unwrap();
    session.request_state_all(AlState::Operational).await.unwrap();
    (session, map)
}

#[tokio::test]
async fn exchange_carries_both_images() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    assert_eq!(map.len(), 2 * 32);

    let mut cyclic = Cyclic::new(&session, map);
    assert_eq!(cyclic.exchange().await.unwrap(), Cycle::Exchanged);

    // each drive reports through its own input image
    let left = cyclic.get(0, motion::inputs::status);
    let right = cyclic.get(1, motion::inputs::status);
    assert!(left.ready_switch_on());
    assert!(right.ready_switch_on());
    assert!(! left.operation_enabled());
}

#[tokio::test]
async fn exchange_refused_before_operational() {
    let chain = chain();
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();
    let map = session.configure_images(&[(0, SERVO_LAYOUT)]).await.unwrap();
    // the drive was mapped but never brought to Operational
    let mut cyclic = Cyclic::new(&session, map);
    assert!(matches!(cyclic.exchange().await, Err(Error::NotOperational)));
}

#[tokio::test]
async fn mapping_refused_after_preoperational() {
    let chain = chain();
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();
    session.request_state(0, AlState::SafeOperational).await.unwrap();
    assert!(session.configure_images(&[(0, SERVO_LAYOUT)]).await.is_err());
}

#[tokio::test]
async fn lost_cycles_keep_the_last_inputs() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);

    cyclic.exchange().await.unwrap();
    let before = cyclic.get(0, motion::inputs::status);

    chain.drop_frames(1);
    assert_eq!(cyclic.exchange().await.unwrap(), Cycle::Lost);
    assert_eq!(cyclic.lost_streak(), 1);
    assert_eq!(cyclic.get(0, motion::inputs::status), before);

    // a sound cycle clears the streak
    assert_eq!(cyclic.exchange().await.unwrap(), Cycle::Exchanged);
    assert_eq!(cyclic.lost_streak(), 0);
}

#[tokio::test]
async fn repeated_losses_tear_the_link_down() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map).with_lost_threshold(2);

    chain.drop_frames(10);
    assert_eq!(cyclic.exchange().await.unwrap(), Cycle::Lost);
    assert!(matches!(cyclic.exchange().await, Err(Error::LinkDown(2))));
}

#[tokio::test]
async fn unplugged_device_loses_the_cycle() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    assert_eq!(cyclic.exchange().await.unwrap(), Cycle::Exchanged);

    // one device drops off, the working counter comes back short
    chain.set_online(1, false);
    assert_eq!(cyclic.exchange().await.unwrap(), Cycle::Lost);
}
