//! Host service core logic.
//!
//! Establishes the shared-memory session and drives the producer side
//! of every channel: frames from the test-pattern source at a paced
//! rate, cursor motion alongside each frame, and a clipboard greeting
//! once a consumer shows up.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use prism_core::{ClipboardKind, PrismError, SessionLayout, SharedRegion};

use crate::config::HostConfig;
use crate::pattern::TestPattern;

/// How often to log the running frame counter.
const STATS_EVERY: u64 = 300;

// ── HostService ──────────────────────────────────────────────────

/// The top-level host service.
///
/// Owns the shared region for the lifetime of the session; dropping
/// it unlinks the POSIX object.
pub struct HostService {
    config: HostConfig,
    region: SharedRegion,
    layout: SessionLayout,
}

impl HostService {
    /// Create the shared region and establish the session.
    ///
    /// Fails if an object with the configured name already exists —
    /// one producer per session.
    pub fn establish(config: HostConfig) -> Result<Self, PrismError> {
        let session_config = config.to_session_config();
        let region = SharedRegion::create(&config.session.name, session_config.region_size())?;
        let layout = SessionLayout::initialise(&region, &session_config)?;
        info!(
            "session {} established ({} bytes)",
            config.session.name,
            region.capacity()
        );
        Ok(Self {
            config,
            region,
            layout,
        })
    }

    /// Run the producer loop until the frame budget is spent.
    ///
    /// 1. Attaches the producer side of every channel.
    /// 2. Publishes one frame per tick, pacing to the configured FPS.
    /// 3. Sends a cursor position with every frame.
    /// 4. Answers client→host clipboard transfers in the gaps.
    /// 5. Clears the alive flag on the way out so consumer spins end
    ///    in a clean teardown rather than a hang.
    pub fn run(&self) -> Result<(), PrismError> {
        let alive = self.layout.alive(&self.region)?;
        let mut channels = self
            .layout
            .host_channels(&self.region, self.config.wait_mode())?;

        let disp = &self.config.display;
        let mut pattern = TestPattern::new(disp.width, disp.height);
        let frame_interval = Duration::from_secs(1) / u32::from(disp.fps.clamp(1, 240));

        info!(
            "publishing {}x{} @ {} fps",
            disp.width, disp.height, disp.fps
        );

        let mut published: u64 = 0;
        let mut greeted = false;
        let started = Instant::now();

        let result = loop {
            if disp.max_frames != 0 && published >= disp.max_frames {
                break Ok(());
            }

            // Single frame in flight: wait for the consumer to release
            // the previous one. Until a consumer attaches this is
            // where the host parks.
            while !channels.frames.consumer_done() {
                std::thread::yield_now();
            }

            if !greeted && published > 0 {
                // The consumer released a frame, so one is listening.
                channels.clipboard_tx.send(
                    ClipboardKind::Text,
                    b"prism-host session established",
                    &alive,
                )?;
                greeted = true;
            }

            let deadline = started + frame_interval * (published as u32 + 1);

            let header = pattern.next_frame();
            if let Err(e) = self.publish_frame(&mut channels, &header, pattern.payload(), &alive) {
                break Err(e);
            }
            channels.cursor.send_position(pattern.cursor(), &alive)?;
            published += 1;

            if published % STATS_EVERY == 0 {
                let secs = started.elapsed().as_secs_f64();
                info!(
                    "{published} frames, {:.1} fps effective",
                    published as f64 / secs
                );
            }

            while channels.clipboard_rx.has_data() {
                let data = channels.clipboard_rx.read(&alive)?;
                debug!("client clipboard: {:?}, {} bytes", data.kind, data.data.len());
            }

            if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(remaining);
            }
        };

        // Teardown: whatever happened above, tell the consumer.
        alive.shutdown();
        match &result {
            Ok(()) => info!("frame budget reached, session closed"),
            Err(e) => warn!("producer loop failed: {e}"),
        }
        result
    }

    fn publish_frame(
        &self,
        channels: &mut prism_core::HostChannels<'_>,
        header: &prism_core::FrameHeader,
        payload: &[u8],
        alive: &prism_core::SessionAlive<'_>,
    ) -> Result<(), PrismError> {
        channels.frames.begin_frame(alive)?;
        channels.frames.write_header(header)?;
        channels.frames.write_payload(payload)?;
        channels.frames.finish_frame()
    }
}
