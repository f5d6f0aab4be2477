//! Chart lifecycle for the challenge view.
//!
//! `ChallengeView` owns the handle of the chart it created and the pending
//! profile-image loads for it. Images settle through `OverlayCompletion`,
//! possibly from another thread; once every requested image has settled the
//! view issues a single overlay draw pass. Destroying the chart cancels the
//! outstanding loads so nothing is drawn on a disposed surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chart::{build_chart_model, ChartModel, OverlayAnchor};
use crate::{ChallengeData, ChallengeError, Params};

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loaded profile image positioned at the end of an athlete's line.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedOverlay<I> {
    pub alias: String,
    pub day: usize,
    pub distance: f64,
    pub image: I,
}

/// Surface that draws charts for the view.
pub trait ChartBackend {
    type Handle;
    type Image;

    fn create(&mut self, model: &ChartModel) -> Result<Self::Handle, ChallengeError>;
    fn draw_overlays(&mut self, handle: &Self::Handle, overlays: &[PlacedOverlay<Self::Image>]);
    fn destroy(&mut self, handle: Self::Handle);
}

/// Fetches profile images. Implementations settle the completion whenever the
/// image is ready; dropping it unsettled counts as a failure.
pub trait ImageLoader {
    type Image: Send + 'static;

    fn load(&self, source: &str, completion: OverlayCompletion<Self::Image>);
}

struct Settled<I> {
    slot: usize,
    image: Option<I>,
}

pub struct OverlayCompletion<I> {
    slot: usize,
    token: CancelToken,
    sender: Option<Sender<Settled<I>>>,
}

impl<I> OverlayCompletion<I> {
    fn new(slot: usize, token: CancelToken, sender: Sender<Settled<I>>) -> Self {
        Self {
            slot,
            token,
            sender: Some(sender),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn resolve(mut self, image: I) {
        self.settle(Some(image));
    }

    pub fn fail(mut self) {
        self.settle(None);
    }

    fn settle(&mut self, image: Option<I>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        if self.token.is_cancelled() {
            return;
        }
        // The receiver is gone once the chart was replaced.
        let _ = sender.send(Settled {
            slot: self.slot,
            image,
        });
    }
}

impl<I> Drop for OverlayCompletion<I> {
    fn drop(&mut self) {
        self.settle(None);
    }
}

struct ActiveChart<H, I> {
    handle: H,
    model: ChartModel,
    token: CancelToken,
    receiver: Receiver<Settled<I>>,
    requested: Vec<OverlayAnchor>,
    loaded: Vec<Option<I>>,
    pending: usize,
    overlays_drawn: bool,
}

pub struct ChallengeView<B, L>
where
    B: ChartBackend,
    L: ImageLoader<Image = B::Image>,
{
    backend: B,
    loader: L,
    params: Params,
    active: Option<ActiveChart<B::Handle, B::Image>>,
}

impl<B, L> ChallengeView<B, L>
where
    B: ChartBackend,
    L: ImageLoader<Image = B::Image>,
{
    pub fn new(backend: B, loader: L, params: Params) -> Self {
        Self {
            backend,
            loader,
            params,
            active: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn model(&self) -> Option<&ChartModel> {
        self.active.as_ref().map(|active| &active.model)
    }

    /// Replace the current chart with one for `month_index` and start loading
    /// profile images for its markers.
    pub fn render(&mut self, data: &ChallengeData, month_index: i64) -> Result<(), ChallengeError> {
        self.destroy();

        let model = build_chart_model(data, month_index, &self.params);
        let handle = self.backend.create(&model)?;
        let token = CancelToken::new();
        let (sender, receiver) = mpsc::channel();

        let requested: Vec<OverlayAnchor> = model
            .overlays
            .iter()
            .filter(|anchor| anchor.profile.is_some())
            .cloned()
            .collect();
        debug!(
            "Rendering challenge chart: month {}, {} datasets, {} images",
            month_index,
            model.datasets.len(),
            requested.len()
        );

        for (slot, anchor) in requested.iter().enumerate() {
            if let Some(source) = anchor.profile.as_deref() {
                self.loader.load(
                    source,
                    OverlayCompletion::new(slot, token.clone(), sender.clone()),
                );
            }
        }
        drop(sender);

        self.active = Some(ActiveChart {
            handle,
            model,
            token,
            receiver,
            loaded: requested.iter().map(|_| None).collect(),
            pending: requested.len(),
            overlays_drawn: requested.is_empty(),
            requested,
        });
        self.poll_overlays();
        Ok(())
    }

    /// Collect settled images; returns true when the overlay pass was drawn.
    pub fn poll_overlays(&mut self) -> bool {
        let Self {
            backend, active, ..
        } = self;
        let Some(active) = active.as_mut() else {
            return false;
        };
        if active.overlays_drawn {
            return false;
        }

        loop {
            match active.receiver.try_recv() {
                Ok(Settled { slot, image }) => {
                    if image.is_none() {
                        warn!(
                            "Profile image for {} failed to load",
                            active.requested[slot].alias
                        );
                    }
                    active.loaded[slot] = image;
                    active.pending = active.pending.saturating_sub(1);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if active.pending > 0 {
            return false;
        }

        active.overlays_drawn = true;
        let placed: Vec<PlacedOverlay<B::Image>> = active
            .requested
            .iter()
            .zip(active.loaded.iter_mut())
            .filter_map(|(anchor, image)| {
                image.take().map(|image| PlacedOverlay {
                    alias: anchor.alias.clone(),
                    day: anchor.day,
                    distance: anchor.distance,
                    image,
                })
            })
            .collect();
        if placed.is_empty() {
            return false;
        }
        backend.draw_overlays(&active.handle, &placed);
        debug!("Drew {} profile overlays", placed.len());
        true
    }

    pub fn destroy(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            self.backend.destroy(active.handle);
            debug!("Challenge chart destroyed");
        }
    }
}

impl<B, L> Drop for ChallengeView<B, L>
where
    B: ChartBackend,
    L: ImageLoader<Image = B::Image>,
{
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Host dashboard the challenge view alternates with.
pub trait Dashboard {
    fn data(&self) -> &ChallengeData;
    fn destroy_charts(&mut self);
    fn render_dashboard(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMode {
    Dashboard,
    Challenge,
}

/// Switches between the dashboard's own charts and the challenge chart.
pub struct ChallengeToggle<D, B, L>
where
    D: Dashboard,
    B: ChartBackend,
    L: ImageLoader<Image = B::Image>,
{
    dashboard: D,
    view: ChallengeView<B, L>,
    mode: ViewMode,
    month_index: i64,
}

impl<D, B, L> ChallengeToggle<D, B, L>
where
    D: Dashboard,
    B: ChartBackend,
    L: ImageLoader<Image = B::Image>,
{
    /// Starts in dashboard mode; nothing is rendered until the first switch.
    pub fn new(dashboard: D, view: ChallengeView<B, L>, month_index: i64) -> Self {
        Self {
            dashboard,
            view,
            mode: ViewMode::Dashboard,
            month_index,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn month_index(&self) -> i64 {
        self.month_index
    }

    pub fn dashboard(&self) -> &D {
        &self.dashboard
    }

    pub fn view(&self) -> &ChallengeView<B, L> {
        &self.view
    }

    pub fn toggle(&mut self) -> Result<ViewMode, ChallengeError> {
        self.set_challenge(self.mode == ViewMode::Dashboard)?;
        Ok(self.mode)
    }

    pub fn set_challenge(&mut self, enabled: bool) -> Result<(), ChallengeError> {
        match (self.mode, enabled) {
            (ViewMode::Dashboard, true) => {
                self.dashboard.destroy_charts();
                if let Err(err) = self.view.render(self.dashboard.data(), self.month_index) {
                    self.dashboard.render_dashboard();
                    return Err(err);
                }
                self.mode = ViewMode::Challenge;
            }
            (ViewMode::Challenge, false) => {
                self.view.destroy();
                self.dashboard.render_dashboard();
                self.mode = ViewMode::Dashboard;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_month(&mut self, month_index: i64) -> Result<(), ChallengeError> {
        self.month_index = month_index;
        if self.mode == ViewMode::Challenge {
            if let Err(err) = self.view.render(self.dashboard.data(), month_index) {
                self.dashboard.render_dashboard();
                self.mode = ViewMode::Dashboard;
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn poll_overlays(&mut self) -> bool {
        self.view.poll_overlays()
    }
}
