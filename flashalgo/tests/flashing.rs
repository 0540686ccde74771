use flashalgo::flashing::{
    AbortHandle, EntryPoint, FillPolicy, FlashError, FlashOptions, SessionState,
};
use flashalgo::test::FakeTarget;
use flashalgo::{DebugInterface, Registry, Session};
use flashalgo_target::{MemoryRegion, NvmRegion};
use pretty_assertions::assert_eq;

const CHIP: &str = "MKW24D512xxx5";

fn attach() -> (FakeTarget, Session, NvmRegion) {
    let _ = pretty_env_logger::try_init();

    let target = Registry::from_builtin_families()
        .expect("Failed to load the built-in targets.")
        .get_target_by_name(CHIP)
        .expect("The built-in target is missing.");
    let fake = FakeTarget::new(&target);
    let session = Session::new(Box::new(fake.clone()), target);
    let region = session
        .target()
        .nvm_regions()
        .next()
        .expect("The target has no flash.")
        .clone();

    (fake, session, region)
}

fn calls_to(fake: &FakeTarget, entry_point: EntryPoint) -> Vec<u32> {
    fake.calls()
        .iter()
        .filter(|call| call.entry_point == entry_point)
        .map(|call| call.arguments[0])
        .collect()
}

fn read(fake: &FakeTarget, address: u64, length: usize) -> Vec<u8> {
    let mut data = vec![0; length];
    fake.clone()
        .read_memory(address, &mut data)
        .expect("Failed to read the fake memory.");
    data
}

#[test]
fn erase_then_program_two_pages() {
    let (fake, mut session, region) = attach();
    let options = FlashOptions::default();

    session.erase(&region, 0x1000, 0x800, &options).unwrap();
    assert_eq!(calls_to(&fake, EntryPoint::EraseSector), vec![0x1000]);

    session
        .program(&region, 0x1000, &[0x5a; 0x1000], &options)
        .unwrap();
    assert_eq!(
        calls_to(&fake, EntryPoint::ProgramPage),
        vec![0x1000, 0x1800]
    );
    assert_eq!(read(&fake, 0x1000, 0x1000), vec![0x5a; 0x1000]);
    assert_eq!(session.execution().state(), SessionState::Loaded);
}

#[test]
fn verify_detects_a_flipped_byte() {
    let (_fake, mut session, region) = attach();
    let options = FlashOptions::default();
    let mut data: Vec<u8> = (0..0x800).map(|i| i as u8).collect();

    session.program_at(0x2000, &data, &options).unwrap();
    session.verify(&region, 0x2000, &data, &options).unwrap();

    data[0x10] ^= 0x01;
    let error = session.verify(&region, 0x2000, &data, &options).unwrap_err();

    assert!(matches!(
        error,
        FlashError::VerificationError {
            address: 0x2000,
            ..
        }
    ));
}

#[test]
fn timeout_forces_a_reload() {
    let (fake, mut session, region) = attach();
    let options = FlashOptions::default();
    fake.hang(EntryPoint::EraseSector);

    let error = session.erase(&region, 0x0, 0x800, &options).unwrap_err();

    assert!(matches!(
        error,
        FlashError::AlgorithmTimeout {
            entry_point: EntryPoint::EraseSector,
            address: Some(0x0),
            ..
        }
    ));
    assert_eq!(session.execution().state(), SessionState::Unloaded);
    assert!(fake.is_halted());

    session.erase(&region, 0x0, 0x800, &options).unwrap();

    assert_eq!(fake.image_writes(), 2);
    assert_eq!(session.execution().state(), SessionState::Loaded);
}

#[test]
fn restore_keeps_the_rest_of_the_sector() {
    let (fake, mut session, _region) = attach();
    let options = FlashOptions::default();
    session.program_at(0x3000, &[0x55; 0x800], &options).unwrap();

    let options = FlashOptions {
        fill: FillPolicy::Restore,
        ..Default::default()
    };
    session
        .program_at(0x3000, &[0x11, 0x22, 0x33, 0x44], &options)
        .unwrap();

    assert_eq!(read(&fake, 0x3000, 4), vec![0x11, 0x22, 0x33, 0x44]);
    assert_eq!(read(&fake, 0x3004, 0x7fc), vec![0x55; 0x7fc]);
}

#[test]
fn aborted_before_the_first_sector() {
    let (fake, mut session, _region) = attach();
    let abort = AbortHandle::new();
    abort.abort();
    let options = FlashOptions {
        abort: Some(abort),
        ..Default::default()
    };

    let error = session.program_at(0x0, &[0; 0x800], &options).unwrap_err();

    assert!(matches!(error, FlashError::Aborted { address: 0x0 }));
    assert!(calls_to(&fake, EntryPoint::EraseSector).is_empty());
    assert!(calls_to(&fake, EntryPoint::ProgramPage).is_empty());
}

#[test]
fn regions_of_the_builtin_target() {
    let (_fake, session, _region) = attach();
    let target = session.target();

    assert!(matches!(
        target.region_for(0x3000),
        Ok(MemoryRegion::Nvm(_))
    ));
    assert!(matches!(
        target.region_for(0x1fff_8000),
        Ok(MemoryRegion::Ram(_))
    ));
    assert!(matches!(
        target.region_for(0x4000_0000),
        Err(FlashError::AddressNotMapped(0x4000_0000))
    ));
    assert_eq!(
        target.algorithm_for(0x7_ffff).unwrap().name,
        "kinetis_kw24d_512"
    );
}
