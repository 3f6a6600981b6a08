//! Hann analysis/synthesis windows and the size-keyed window cache.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

/// A Hann window of a fixed size.
#[derive(Debug, Clone)]
pub struct Window {
    samples: Vec<f32>,
    area: f32,
}

impl Window {
    pub fn new(size: usize) -> Self {
        let samples = hann(size);
        let area = samples.iter().sum();
        Self { samples, area }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.samples.len()
    }

    /// Sum of the window samples, used by the synthesiser for gain scaling.
    #[inline]
    pub fn area(&self) -> f32 {
        self.area
    }

    /// Multiplies the window into `buf` in place.
    #[inline]
    pub fn cut(&self, buf: &mut [f32]) {
        for (sample, &w) in buf.iter_mut().zip(self.samples.iter()) {
            *sample *= w;
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

fn hann(size: usize) -> Vec<f32> {
    match size {
        0 => return vec![],
        1 => return vec![1.0],
        _ => {}
    }
    let n = size as f64;
    (0..size)
        .map(|i| {
            let x = (2.0 * PI * i as f64) / n;
            (0.5 * (1.0 - x.cos())) as f32
        })
        .collect()
}

/// Memoises Hann windows by size.
///
/// Realtime mode pre-populates the sizes it may switch to, so a later
/// ratio change finds its window here instead of allocating.
#[derive(Debug, Default)]
pub struct WindowCache {
    windows: HashMap<usize, Arc<Window>>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the window for `size`, computing and caching it if absent.
    pub fn ensure(&mut self, size: usize) -> Arc<Window> {
        self.windows
            .entry(size)
            .or_insert_with(|| Arc::new(Window::new(size)))
            .clone()
    }

    /// Returns the cached window for `size` without populating.
    pub fn get(&self, size: usize) -> Option<Arc<Window>> {
        self.windows.get(&size).cloned()
    }

    pub fn contains(&self, size: usize) -> bool {
        self.windows.contains_key(&size)
    }
}
