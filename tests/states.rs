//! communication state control against simulated devices

use etherflow::{
    sim::{SimChain, SimDevice},
    AlError, AlState, DeviceIdentity, Error, Session,
    };

fn chain(count: u32) -> SimChain {
    let chain = SimChain::new();
    for serial in 0 .. count {
        chain.push(SimDevice::new(DeviceIdentity {
            vendor: 0xe7f,
            product: 0x2001,
            revision: 1,
            serial,
            }).servo());
    }
    chain
}

#[tokio::test]
async fn forward_walks_the_whole_ladder() {
    let chain = chain(2);
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();

    session.request_state(0, AlState::Operational).await.unwrap();
    assert_eq!(chain.al_state(0), AlState::Operational);
    assert_eq!(session.registry().get(0).unwrap().state, AlState::Operational);
    // the other device was not asked anything
    assert_eq!(chain.al_state(1), AlState::Init);

    session.request_state_all(AlState::PreOperational).await.unwrap();
    assert_eq!(chain.al_state(0), AlState::PreOperational);
    assert_eq!(chain.al_state(1), AlState::PreOperational);
}

#[tokio::test]
async fn backward_goes_in_one_hop() {
    let chain = chain(1);
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();

    session.request_state(0, AlState::Operational).await.unwrap();
    session.request_state(0, AlState::Init).await.unwrap();
    assert_eq!(chain.al_state(0), AlState::Init);
}

#[tokio::test]
async fn unresponsive_device_times_out() {
    let chain = chain(1);
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();

    chain.freeze_al(0, true);
    assert!(matches!(
        session.request_state(0, AlState::PreOperational).await,
        Err(Error::TransitionTimeout {fault: None, ..}),
        ));

    chain.freeze_al(0, false);
    session.request_state(0, AlState::PreOperational).await.unwrap();
}

#[tokio::test]
async fn refused_transition_reports_the_fault_code() {
    let chain = chain(1);
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();

    chain.inject_al_fault(0, AlError::InvalidOutputConfig);
    let result = session.request_state(0, AlState::PreOperational).await;
    assert!(matches!(
        result,
        Err(Error::TransitionTimeout {fault: Some(AlError::InvalidOutputConfig), ..}),
        ));

    // the retry acknowledges the fault first and goes through
    session.request_state(0, AlState::PreOperational).await.unwrap();
    assert_eq!(chain.al_state(0), AlState::PreOperational);
}

#[tokio::test]
async fn unknown_device_is_refused() {
    let chain = chain(1);
    let mut session = Session::new(chain.socket());
    session.scan().await.unwrap();
    assert!(matches!(
        session.request_state(5, AlState::PreOperational).await,
        Err(Error::NotFound),
        ));
}
