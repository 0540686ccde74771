use crate::config::{Registry, Target};
use crate::flashing::{
    uninit_resident, ExecutionSession, FlashError, FlashOptions, Flasher,
};
use crate::{DebugInterface, Error};
use flashalgo_target::{MemoryRegion, NvmRegion};

/// The `Session` struct represents an active debug session with a target.
///
/// It owns the debug probe of the target, its description, and tracks which
/// flash algorithm is resident in the RAM of the target. All flash operations
/// on the target go through the session, one at a time.
///
/// ```no_run
/// # fn probe() -> Box<dyn flashalgo::DebugInterface> { unimplemented!() }
/// use flashalgo::{flashing::FlashOptions, Session};
///
/// let mut session = Session::attach(probe(), "MKW24D512xxx5")?;
/// let region = session.target().nvm_regions().next().unwrap().clone();
///
/// session.erase_all(&region, &FlashOptions::default())?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Session {
    probe: Box<dyn DebugInterface>,
    target: Target,
    execution: ExecutionSession,
}

impl Session {
    /// Open a new session for `target` using `probe`.
    pub fn new(probe: Box<dyn DebugInterface>, target: Target) -> Self {
        Self {
            probe,
            target,
            execution: ExecutionSession::new(),
        }
    }

    /// Open a new session for the built-in target called `chip`.
    pub fn attach(probe: Box<dyn DebugInterface>, chip: &str) -> Result<Self, Error> {
        let target = Registry::from_builtin_families()?.get_target_by_name(chip)?;

        Ok(Self::new(probe, target))
    }

    /// The description of the target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The state of the flash algorithm on the target.
    pub fn execution(&self) -> &ExecutionSession {
        &self.execution
    }

    fn flasher(
        &mut self,
        region: &NvmRegion,
        options: &FlashOptions,
    ) -> Result<Flasher<'_>, FlashError> {
        let algorithm = self.target.algorithm_for_region(region)?.clone();

        Flasher::new(
            self.probe.as_mut(),
            &mut self.execution,
            region.clone(),
            algorithm,
            options,
        )
    }

    /// Erase every sector of `region` which intersects `address..address + length`.
    pub fn erase(
        &mut self,
        region: &NvmRegion,
        address: u64,
        length: u64,
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        if length == 0 {
            return Ok(());
        }

        self.flasher(region, options)?.erase(address, length, options)
    }

    /// Program `data` at `address` into `region`.
    ///
    /// The flash is not erased first. Incomplete pages are padded as
    /// `options.fill` says, and the pages are verified afterwards if
    /// `options.verify` is set and the flash algorithm has an analyzer.
    pub fn program(
        &mut self,
        region: &NvmRegion,
        address: u64,
        data: &[u8],
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }

        self.flasher(region, options)?
            .program(address, data, options, false)
    }

    /// Erase the whole `region` with a single call to the flash algorithm.
    pub fn erase_all(
        &mut self,
        region: &NvmRegion,
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        self.flasher(region, options)?.erase_all()
    }

    /// Check that the flash at `address` contains `data`, using the
    /// CRC analyzer of the flash algorithm.
    ///
    /// Fails with [`FlashError::AnalyzerNotSupported`] if the algorithm has none.
    pub fn verify(
        &mut self,
        region: &NvmRegion,
        address: u64,
        data: &[u8],
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }

        self.flasher(region, options)?.verify(address, data)
    }

    /// Erase the sectors covering `data` and program it at `address`.
    ///
    /// The flash region is looked up from the address.
    pub fn program_at(
        &mut self,
        address: u64,
        data: &[u8],
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }

        let region = match self.target.region_for(address)? {
            MemoryRegion::Nvm(region) => region.clone(),
            _ => return Err(FlashError::NoAlgorithm { address }),
        };

        self.flasher(&region, options)?
            .program(address, data, options, true)
    }

    /// Uninitialize the resident flash algorithm and consider the RAM of the target free.
    pub fn release(&mut self) {
        uninit_resident(self.probe.as_mut(), &mut self.execution);
        self.execution.invalidate();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flashing::{EntryPoint, FunctionCode, SessionState};
    use crate::test::FakeTarget;
    use pretty_assertions::assert_eq;

    fn session() -> (FakeTarget, Session) {
        let target = Registry::from_builtin_families()
            .unwrap()
            .get_target_by_name("MKW24D512xxx5")
            .unwrap();
        let fake = FakeTarget::new(&target);

        (fake.clone(), Session::new(Box::new(fake), target))
    }

    fn flash(session: &Session) -> NvmRegion {
        session.target().nvm_regions().next().unwrap().clone()
    }

    #[test]
    fn zero_length_erase_does_nothing() {
        let (fake, mut session) = session();
        let region = flash(&session);

        session.erase(&region, 0x1000, 0, &FlashOptions::default()).unwrap();

        assert_eq!(fake.image_writes(), 0);
        assert_eq!(session.execution().state(), SessionState::Unloaded);
    }

    #[test]
    fn erase_covers_partial_sectors() {
        let (fake, mut session) = session();
        let region = flash(&session);

        session.erase(&region, 0x17fc, 0x8, &FlashOptions::default()).unwrap();

        let sectors: Vec<u32> = fake
            .calls()
            .iter()
            .filter(|call| call.entry_point == EntryPoint::EraseSector)
            .map(|call| call.arguments[0])
            .collect();
        assert_eq!(sectors, vec![0x1000, 0x1800]);
    }

    #[test]
    fn program_at_ram_has_no_algorithm() {
        let (_fake, mut session) = session();

        let error = session
            .program_at(0x2000_0000, &[0; 4], &FlashOptions::default())
            .unwrap_err();

        assert!(matches!(
            error,
            FlashError::NoAlgorithm {
                address: 0x2000_0000
            }
        ));
    }

    #[test]
    fn program_outside_of_region() {
        let (_fake, mut session) = session();
        let region = flash(&session);

        let error = session
            .program(&region, 0x7_fffc, &[0; 8], &FlashOptions::default())
            .unwrap_err();

        assert!(matches!(
            error,
            FlashError::AddressNotInRegion {
                start: 0x7_fffc,
                end: 0x8_0004,
                ..
            }
        ));
    }

    #[test]
    fn data_past_the_end_of_the_address_space() {
        let (_fake, mut session) = session();
        let region = flash(&session);
        let options = FlashOptions::default();

        let error = session
            .program(&region, u64::MAX - 1, &[0; 4], &options)
            .unwrap_err();
        assert!(matches!(error, FlashError::AddressNotInRegion { .. }));

        let error = session
            .verify(&region, u64::MAX - 1, &[0; 4], &options)
            .unwrap_err();
        assert!(matches!(error, FlashError::AddressNotInRegion { .. }));
    }

    #[test]
    fn algorithm_stays_resident_between_operations() {
        let (fake, mut session) = session();
        let region = flash(&session);

        session.erase(&region, 0x0, 0x800, &FlashOptions::default()).unwrap();
        session
            .program(&region, 0x0, &[0x11; 0x800], &FlashOptions::default())
            .unwrap();

        assert_eq!(fake.image_writes(), 1);
        assert_eq!(session.execution().state(), SessionState::Loaded);
    }

    #[test]
    fn release_unloads_the_algorithm() {
        let (fake, mut session) = session();
        let region = flash(&session);
        fake.return_code(EntryPoint::EraseSector, Some(0x0), 1);
        let _ = session.erase(&region, 0x0, 0x800, &FlashOptions::default());
        assert_eq!(
            session.execution().state(),
            SessionState::Initialized(FunctionCode::Erase)
        );

        session.release();

        assert_eq!(session.execution().state(), SessionState::Unloaded);
        let last = fake.calls().pop().unwrap();
        assert_eq!(last.entry_point, EntryPoint::UnInit);
        assert_eq!(last.arguments[0], FunctionCode::Erase.value());
    }
}
