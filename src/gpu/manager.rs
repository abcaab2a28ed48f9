use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Binding, ConfigRequirements, ContextId, GpuPlatform, SurfaceId, TextureId};
use crate::error::{Error, Result};
use crate::image::PixelSource;

/// Owner of the single GPU display connection.
///
/// Created once per process and shared by `Arc`. Overlay windows hold a
/// clone, so the connection is only terminated after every window has
/// released its surface and context.
pub struct GpuContextManager<P: GpuPlatform> {
    platform: P,
    live_surfaces: AtomicUsize,
    live_contexts: AtomicUsize,
}

/// Restores the binding that was current before a scoped block.
struct RestoreCurrent<'a, P: GpuPlatform> {
    platform: &'a P,
    previous: Option<Binding>,
}

impl<P: GpuPlatform> Drop for RestoreCurrent<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.platform.make_current(self.previous) {
            tracing::error!("Failed to restore previous GPU context: {}", e);
        }
    }
}

impl<P: GpuPlatform> GpuContextManager<P> {
    /// Open the display with the default requirements.
    pub fn initialize(platform: P, display: P::NativeDisplay) -> Result<Arc<Self>> {
        Self::initialize_with(platform, display, ConfigRequirements::default())
    }

    /// Open the display and choose a configuration matching `requirements`.
    pub fn initialize_with(
        platform: P,
        display: P::NativeDisplay,
        requirements: ConfigRequirements,
    ) -> Result<Arc<Self>> {
        platform.open(display, &requirements)?;
        tracing::info!("GPU display initialized");
        Ok(Arc::new(Self {
            platform,
            live_surfaces: AtomicUsize::new(0),
            live_contexts: AtomicUsize::new(0),
        }))
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Surfaces created and not yet destroyed.
    pub fn live_surfaces(&self) -> usize {
        self.live_surfaces.load(Ordering::Acquire)
    }

    /// Contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::Acquire)
    }

    /// Bind a drawable surface to an existing native window.
    pub fn create_surface(&self, window: &P::NativeWindow) -> Result<SurfaceId> {
        let surface = self.platform.create_surface(window)?;
        self.live_surfaces.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Created surface {:?}", surface);
        Ok(surface)
    }

    /// Allocate a rendering context compatible with `surface`.
    pub fn create_context(&self, surface: SurfaceId) -> Result<ContextId> {
        let context = self.platform.create_context(surface)?;
        self.live_contexts.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Created context {:?} for surface {:?}", context, surface);
        Ok(context)
    }

    pub fn destroy_surface(&self, surface: SurfaceId) {
        self.platform.destroy_surface(surface);
        self.live_surfaces.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn destroy_context(&self, context: ContextId) {
        self.platform.destroy_context(context);
        self.live_contexts.fetch_sub(1, Ordering::AcqRel);
    }

    /// Run `action` with `surface`/`context` current on this thread.
    ///
    /// The binding that was current before the call is restored on every
    /// exit path: normal return, error return, and unwinding.
    pub fn run_scoped<T, F>(&self, surface: SurfaceId, context: ContextId, action: F) -> Result<T>
    where
        F: FnOnce(&P) -> Result<T>,
    {
        let previous = self.platform.current();
        self.platform.make_current(Some(Binding { surface, context }))?;
        let _restore = RestoreCurrent {
            platform: &self.platform,
            previous,
        };
        action(&self.platform)
    }

    /// Upload the current snapshot of `source` into `texture`.
    ///
    /// Must be called from inside `run_scoped` for the texture's context.
    pub fn load_texture<S>(&self, source: &S, texture: TextureId) -> Result<()>
    where
        S: PixelSource + ?Sized,
    {
        if self.platform.current().is_none() {
            return Err(Error::NoCurrentContext);
        }
        self.platform.upload_texture(texture, source.view())
    }
}

impl<P: GpuPlatform> Drop for GpuContextManager<P> {
    fn drop(&mut self) {
        let surfaces = self.live_surfaces();
        let contexts = self.live_contexts();
        if surfaces != 0 || contexts != 0 {
            tracing::error!(
                "GPU display terminated with {} surfaces and {} contexts still alive",
                surfaces,
                contexts
            );
        }
        self.platform.terminate();
        tracing::info!("GPU display terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{GpuCall, GpuFault, HeadlessGpu, HeadlessWindow};
    use crate::image::{Frame, StillImage};
    use proptest::prelude::*;
    use std::panic::{self, AssertUnwindSafe};

    fn pair(manager: &GpuContextManager<HeadlessGpu>, id: u64) -> (SurfaceId, ContextId) {
        let surface = manager.create_surface(&HeadlessWindow { id }).unwrap();
        let context = manager.create_context(surface).unwrap();
        (surface, context)
    }

    #[test]
    fn test_initialize_failures() {
        let gpu = HeadlessGpu::new();
        gpu.inject_fault(GpuFault::Open);
        assert!(matches!(
            GpuContextManager::initialize(gpu, ()),
            Err(Error::DisplayInit(_))
        ));

        let requirements = ConfigRequirements {
            color_bits: 16,
            ..Default::default()
        };
        assert!(matches!(
            GpuContextManager::initialize_with(HeadlessGpu::new(), (), requirements),
            Err(Error::NoMatchingConfig)
        ));
    }

    #[test]
    fn test_run_scoped_restores_none() {
        let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
        let (surface, context) = pair(&manager, 1);
        let seen = manager
            .run_scoped(surface, context, |gpu| Ok(gpu.current()))
            .unwrap();
        assert_eq!(seen, Some(Binding { surface, context }));
        assert_eq!(manager.platform().current(), None);
    }

    #[test]
    fn test_run_scoped_nested_restores_outer() {
        let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
        let (s1, c1) = pair(&manager, 1);
        let (s2, c2) = pair(&manager, 2);
        manager
            .run_scoped(s1, c1, |gpu| {
                let inner: Result<()> =
                    manager.run_scoped(s2, c2, |_| Err(Error::Gpu("inner".to_string())));
                assert!(inner.is_err());
                assert_eq!(gpu.current(), Some(Binding { surface: s1, context: c1 }));
                Ok(())
            })
            .unwrap();
        assert_eq!(manager.platform().current(), None);
    }

    #[test]
    fn test_run_scoped_restores_on_panic() {
        let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
        let (s1, c1) = pair(&manager, 1);
        let (s2, c2) = pair(&manager, 2);
        manager.platform().make_current(Some(Binding { surface: s1, context: c1 })).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<()> = manager.run_scoped(s2, c2, |_| panic!("draw failed"));
        }));
        assert!(result.is_err());
        assert_eq!(
            manager.platform().current(),
            Some(Binding { surface: s1, context: c1 })
        );
    }

    #[test]
    fn test_load_texture_requires_scope() {
        let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
        let (surface, context) = pair(&manager, 1);
        let source = StillImage::new(Frame::solid(3, 3, [9, 9, 9, 255]), 0, 0);
        let texture = manager
            .run_scoped(surface, context, |gpu| gpu.create_texture())
            .unwrap();

        assert!(matches!(
            manager.load_texture(&source, texture),
            Err(Error::NoCurrentContext)
        ));
        manager
            .run_scoped(surface, context, |_| manager.load_texture(&source, texture))
            .unwrap();
        assert!(manager
            .platform()
            .calls()
            .contains(&GpuCall::Upload(texture, 3, 3)));
    }

    #[test]
    fn test_live_counts() {
        let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
        let (surface, context) = pair(&manager, 1);
        assert_eq!((manager.live_surfaces(), manager.live_contexts()), (1, 1));
        manager.destroy_context(context);
        manager.destroy_surface(surface);
        assert_eq!((manager.live_surfaces(), manager.live_contexts()), (0, 0));
    }

    proptest! {
        #[test]
        fn prop_run_scoped_always_restores(outcomes in prop::collection::vec(0u8..3, 1..12)) {
            let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
            let pairs: Vec<_> = (1..=3).map(|id| pair(&manager, id)).collect();
            let start = Some(Binding { surface: pairs[0].0, context: pairs[0].1 });
            manager.platform().make_current(start).unwrap();

            for (i, outcome) in outcomes.iter().enumerate() {
                let (surface, context) = pairs[i % pairs.len()];
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    manager.run_scoped(surface, context, |_| match outcome {
                        0 => Ok(()),
                        1 => Err(Error::Gpu("fail".to_string())),
                        _ => panic!("boom"),
                    })
                }));
                prop_assert_eq!(result.is_err(), *outcome == 2);
                prop_assert_eq!(manager.platform().current(), start);
            }
        }
    }
}
