//! The two-driver, barrier-synchronized prefetch protocol.
//!
//! A loader thread paired with a two-party reusable barrier stands in for
//! the load stream, while the calling thread plays the role of the calc
//! stream. `std::sync::Barrier` is already reusable across cycles, so no
//! explicit barrier reset step is needed between window boundaries.
//!
//! The loader runs as a scoped thread (`std::thread::scope`) rather than a
//! detached one: `compute_layer`/`load_window` both close over the model's
//! layer tables and allocator state for the duration of a single pass only,
//! never for `'static`, and a scope guarantees the loader is joined before
//! `run_overlapped_pass` returns.

use {
    crate::error::CoreError,
    std::{
        fmt::{self, Display, Formatter},
        sync::{Barrier, Mutex},
        thread,
    },
};

/// Which half of the model (and therefore which sign convention on ring
/// pool status tags) a pass belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDirection {
    /// Encoder pass; ring pool status tags are positive.
    Encoder,
    /// Decoder pass; ring pool status tags are negative, to disambiguate
    /// from a stale encoder-pass tag left over in a shared ring pool.
    Decoder,
}

/// Failure surfaced by the load-stream side of a prefetch pass.
#[derive(Debug)]
pub enum PrefetchError {
    /// The load-side closure reported an error (e.g. a transfer failure).
    Load(CoreError),
    /// The loader thread panicked instead of returning an error.
    LoaderPanicked,
}

impl Display for PrefetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(err) => write!(f, "prefetch load stream failed: {err}"),
            Self::LoaderPanicked => write!(f, "prefetch loader thread panicked"),
        }
    }
}

impl std::error::Error for PrefetchError {}

impl From<PrefetchError> for CoreError {
    fn from(_: PrefetchError) -> Self {
        CoreError::PrefetchFailed
    }
}

/// Runs one encoder or decoder pass of `num_layers` layers with a
/// double-buffered prefetch window of `window` layers.
///
/// `compute_layer(i)` is called on the current thread for every layer index
/// in order; `sync_calc()` is called once per window boundary, before the
/// barrier rendezvous, to synchronize the calc stream: before each layer
/// `i`, if `i mod W == 0`, the calc stream is synchronized before the
/// rendezvous.
///
/// `sync_load()` runs on the loader thread and is called once per window
/// boundary, before that side's barrier rendezvous, to synchronize the load
/// stream before `load_window` runs.
///
/// `load_window(boundary)` runs on a separate thread and is called once per
/// window boundary after that side's own stream synchronization and barrier
/// rendezvous; it is responsible for resetting the appropriate ring pool
/// and scheduling the next window's uploads (or skipping on a cache hit).
///
/// If `load_window` returns an error, it is surfaced here (wrapped as
/// [`CoreError::PrefetchFailed`]) after the pass completes; the calc side
/// does not abort mid-pass since, by construction, synchronization at each
/// barrier already guarantees the window it's about to consume finished
/// uploading before the error became visible to the loader.
pub fn run_overlapped_pass<C, L>(
    num_layers: u32,
    window: u32,
    mut sync_calc: impl FnMut(),
    sync_load: impl Fn() + Send,
    mut compute_layer: C,
    mut load_window: L,
) -> Result<(), CoreError>
where
    C: FnMut(u32) -> Result<(), CoreError>,
    L: FnMut(u32) -> Result<(), CoreError> + Send,
{
    assert!(window >= 1, "overlap window must be at least 1");

    if num_layers == 0 {
        return Ok(());
    }

    let barrier = Barrier::new(2);
    let load_error: Mutex<Option<CoreError>> = Mutex::new(None);

    let mut calc_result = Ok(());

    thread::scope(|scope| {
        let barrier_ref = &barrier;
        let load_error_ref = &load_error;
        let loader = thread::Builder::new()
            .name("t5-overlap-core-loader".into())
            .spawn_scoped(scope, move || {
                for i in (0..num_layers).step_by(window as usize) {
                    sync_load();
                    barrier_ref.wait();

                    if let Err(err) = load_window(i) {
                        *load_error_ref.lock().unwrap() = Some(err);
                        return;
                    }
                }
            })
            .expect("failed to spawn prefetch loader thread");

        for i in 0..num_layers {
            if i % window == 0 {
                sync_calc();
                barrier.wait();
            }

            if let Err(err) = compute_layer(i) {
                calc_result = Err(err);
                break;
            }
        }

        if loader.join().is_err() {
            if calc_result.is_ok() {
                calc_result = Err(PrefetchError::LoaderPanicked.into());
            }
        }
    });

    calc_result?;

    if let Some(err) = load_error.lock().unwrap().take() {
        return Err(PrefetchError::Load(err).into());
    }

    Ok(())
}
