//! axis motion sequences driven through the cyclic loop

use etherflow::{
    motion::SERVO_LAYOUT,
    sim::{SimChain, SimDevice},
    AlState, Axis, AxisState, Cyclic, DeviceIdentity, Error, Result, Session,
    };

fn chain() -> SimChain {
    let chain = SimChain::new();
    chain.push(SimDevice::new(DeviceIdentity {
        vendor: 0xe7f,
        product: 0x2001,
        revision: 1,
        serial: 1,
        }).servo());
    chain
}

async fn bring_up(chain: &SimChain) -> (Session, etherflow::ProcessMap) {
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();
    let map = session.configure_images(&[(0, SERVO_LAYOUT)]).await.unwrap();
    session.request_state(0, AlState::Operational).await.unwrap();
    (session, map)
}

/// run exchange+poll cycles until the axis reaches `target` or the budget runs out
async fn run_until(cyclic: &mut Cyclic<'_>, axis: &mut Axis, target: AxisState, cycles: u32) -> Result<()> {
    for _ in 0 .. cycles {
        cyclic.exchange().await?;
        if axis.poll(cyclic)? == target {
            return Ok(());
        }
    }
    panic!("axis stuck in {:?} instead of {:?}", axis.state(), target);
}

/// run a fixed number of cycles, returning the last polled state
async fn run(cyclic: &mut Cyclic<'_>, axis: &mut Axis, cycles: u32) -> Result<AxisState> {
    let mut state = axis.state();
    for _ in 0 .. cycles {
        cyclic.exchange().await?;
        state = axis.poll(cyclic)?;
    }
    Ok(state)
}

#[tokio::test]
async fn enable_home_and_position() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();

    axis.start_homing().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Homed, 20).await.unwrap();
    assert_eq!(axis.actual(), 0);

    axis.move_absolute(4_500).unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::TargetReached, 30).await.unwrap();
    assert_eq!(axis.actual(), 4_500);
    assert_eq!(chain.servo_position(0), 4_500);

    // relative moves chain from the commanded target
    axis.move_relative(-2_000).unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::TargetReached, 30).await.unwrap();
    assert_eq!(axis.actual(), 2_500);
}

#[tokio::test]
async fn repeated_homing_request_is_a_noop() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.start_homing().unwrap();
    run(&mut cyclic, &mut axis, 2).await.unwrap();
    assert_eq!(axis.state(), AxisState::Homing);

    // asking again mid-run must not restart the handshake
    axis.start_homing().unwrap();
    assert_eq!(axis.state(), AxisState::Homing);
    run_until(&mut cyclic, &mut axis, AxisState::Homed, 10).await.unwrap();
    assert_eq!(axis.actual(), 0);
}

#[tokio::test]
async fn profile_velocity_paces_the_move() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.start_homing().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Homed, 20).await.unwrap();

    axis.set_profile_velocity(300);
    axis.move_absolute(900).unwrap();
    let mut trace = Vec::new();
    for _ in 0 .. 30 {
        cyclic.exchange().await.unwrap();
        let state = axis.poll(&mut cyclic).unwrap();
        trace.push(chain.servo_position(0));
        if state == AxisState::TargetReached {break}
    }
    assert_eq!(axis.actual(), 900);
    // the drive crawled at the commanded speed instead of its default
    assert!(trace.contains(&300), "trace: {:?}", trace);
    assert!(trace.contains(&600), "trace: {:?}", trace);
}

#[tokio::test]
async fn moves_need_a_homed_axis() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    assert!(axis.move_absolute(100).is_err());
    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    // enabled but not homed yet
    assert!(axis.move_absolute(100).is_err());
}

#[tokio::test]
async fn soft_limits_refuse_the_target() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);
    axis.set_limits(-1_000, 1_000);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.start_homing().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Homed, 20).await.unwrap();

    assert!(matches!(
        axis.move_absolute(5_000),
        Err(Error::OutOfRange {target: 5_000, min: -1_000, max: 1_000}),
        ));
    // the axis did not start moving
    assert_eq!(axis.state(), AxisState::Homed);

    axis.move_absolute(800).unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::TargetReached, 20).await.unwrap();
    assert_eq!(axis.actual(), 800);
}

#[tokio::test]
async fn homing_gives_up_after_its_budget() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);
    // too short for the drive to find its reference
    axis.set_homing_budget(2);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.start_homing().unwrap();
    let outcome = run(&mut cyclic, &mut axis, 10).await;
    assert!(matches!(outcome, Err(Error::HomingTimeout(2))));
}

#[tokio::test]
async fn jogging_crawls_until_stopped() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();

    axis.jog(50).unwrap();
    run(&mut cyclic, &mut axis, 10).await.unwrap();
    let reached = chain.servo_position(0);
    assert!(reached > 0);

    axis.jog_stop().unwrap();
    run(&mut cyclic, &mut axis, 3).await.unwrap();
    // the axis holds its position once stopped
    assert_eq!(chain.servo_position(0), reached + 50);
}

#[tokio::test]
async fn drive_fault_is_reported_and_recoverable() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.start_homing().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Homed, 20).await.unwrap();

    chain.inject_drive_fault(0);
    run_until(&mut cyclic, &mut axis, AxisState::Fault, 10).await.unwrap();
    assert!(axis.fault());
    assert!(axis.move_absolute(100).is_err());
    assert!(axis.enable().is_err());

    axis.reset_fault().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Disabled, 10).await.unwrap();
    // the home reference is gone with the fault
    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    assert!(axis.move_absolute(100).is_err());
}

#[tokio::test]
async fn disable_cancels_a_homing_run() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.start_homing().unwrap();
    axis.disable();
    // observed on the very next poll, without waiting for the reference
    cyclic.exchange().await.unwrap();
    assert_eq!(axis.poll(&mut cyclic).unwrap(), AxisState::Disabled);
}

#[tokio::test]
async fn disable_drops_the_power_stage() {
    let chain = chain();
    let (session, map) = bring_up(&chain).await;
    let mut cyclic = Cyclic::new(&session, map);
    let mut axis = Axis::new(0);

    axis.enable().unwrap();
    run_until(&mut cyclic, &mut axis, AxisState::Ready, 10).await.unwrap();
    axis.disable();
    run_until(&mut cyclic, &mut axis, AxisState::Disabled, 5).await.unwrap();
}
