use crate::error::{Result, S2MosaicError};
use crate::raster::{Window, WindowReader};
use log::debug;
use ndarray::{s, Array3};

/// Tiling of a pixel window into fixed-size chunks, in row-major order.
pub struct ChunkGrid {
    window: Window,
    chunk_size: usize,
    pub num_chunks_x: usize,
    pub num_chunks_y: usize,
    pub total_chunks: usize,
}

impl ChunkGrid {
    pub fn new(window: Window, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(S2MosaicError::InvalidChunkSize(chunk_size));
        }

        // Ceiling division; an empty window yields no chunks
        let num_chunks_x = (window.width + chunk_size - 1) / chunk_size;
        let num_chunks_y = (window.height + chunk_size - 1) / chunk_size;
        let total_chunks = num_chunks_x * num_chunks_y;

        debug!(
            "ChunkGrid: {}x{} window at ({}, {}), chunk_size={} → {}x{} chunks ({} total)",
            window.width,
            window.height,
            window.x_off,
            window.y_off,
            chunk_size,
            num_chunks_x,
            num_chunks_y,
            total_chunks
        );

        Ok(Self {
            window,
            chunk_size,
            num_chunks_x,
            num_chunks_y,
            total_chunks,
        })
    }

    pub fn iter(&self) -> ChunkIterator<'_> {
        ChunkIterator {
            grid: self,
            current_idx: 0,
        }
    }

    /// Absolute raster window of chunk `chunk_idx`.
    pub fn chunk_window(&self, chunk_idx: usize) -> Window {
        let chunk_y = chunk_idx / self.num_chunks_x;
        let chunk_x = chunk_idx % self.num_chunks_x;

        let local_x_min = chunk_x * self.chunk_size;
        let local_y_min = chunk_y * self.chunk_size;
        let local_x_max = ((chunk_x + 1) * self.chunk_size).min(self.window.width);
        let local_y_max = ((chunk_y + 1) * self.chunk_size).min(self.window.height);

        Window::new(
            self.window.x_off + local_x_min,
            self.window.y_off + local_y_min,
            local_x_max - local_x_min,
            local_y_max - local_y_min,
        )
    }
}

pub struct ChunkIterator<'a> {
    grid: &'a ChunkGrid,
    current_idx: usize,
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = (usize, Window);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.grid.total_chunks {
            let window = self.grid.chunk_window(self.current_idx);
            let idx = self.current_idx;
            self.current_idx += 1;
            Some((idx, window))
        } else {
            None
        }
    }
}

/// Materialise `window` from `reader` one chunk at a time.
pub fn read_window_chunked(
    reader: &dyn WindowReader,
    window: &Window,
    chunk_size: usize,
) -> Result<Array3<u16>> {
    let grid = ChunkGrid::new(*window, chunk_size)?;
    let mut output = Array3::<u16>::zeros((reader.band_count(), window.height, window.width));

    for (idx, chunk) in grid.iter() {
        let data = reader.read_window(&chunk)?;
        let expected = (output.dim().0, chunk.height, chunk.width);
        if data.dim() != expected {
            return Err(S2MosaicError::Mosaic(format!(
                "chunk {} returned shape {:?}, expected {:?}",
                idx,
                data.dim(),
                expected
            )));
        }

        let row = chunk.y_off - window.y_off;
        let col = chunk.x_off - window.x_off;
        output
            .slice_mut(s![.., row..row + chunk.height, col..col + chunk.width])
            .assign(&data);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingReader {
        width: usize,
        height: usize,
        reads: Cell<usize>,
    }

    impl WindowReader for CountingReader {
        fn size(&self) -> (usize, usize) {
            (self.width, self.height)
        }

        fn band_count(&self) -> usize {
            1
        }

        fn read_window(&self, window: &Window) -> Result<Array3<u16>> {
            self.reads.set(self.reads.get() + 1);
            Ok(Array3::from_shape_fn((1, window.height, window.width), |(_, r, c)| {
                ((window.y_off + r) * self.width + window.x_off + c) as u16
            }))
        }
    }

    #[test]
    fn test_chunk_grid_simple() {
        let grid = ChunkGrid::new(Window::new(0, 0, 4000, 4000), 2000).unwrap();
        assert_eq!(grid.num_chunks_x, 2);
        assert_eq!(grid.num_chunks_y, 2);
        assert_eq!(grid.total_chunks, 4);
    }

    #[test]
    fn test_chunk_window_edge() {
        let grid = ChunkGrid::new(Window::new(100, 50, 4500, 2100), 2048).unwrap();
        assert_eq!(grid.total_chunks, 6);

        let last = grid.chunk_window(5);
        assert_eq!(last, Window::new(100 + 4096, 50 + 2048, 404, 52));
    }

    #[test]
    fn test_zero_chunk_size() {
        assert!(ChunkGrid::new(Window::new(0, 0, 10, 10), 0).is_err());
    }

    #[test]
    fn test_empty_window_has_no_chunks() {
        let grid = ChunkGrid::new(Window::new(0, 0, 0, 10), 16).unwrap();
        assert_eq!(grid.iter().count(), 0);
    }

    #[test]
    fn test_read_window_chunked_matches_direct_read() {
        let reader = CountingReader {
            width: 20,
            height: 20,
            reads: Cell::new(0),
        };
        let window = Window::new(3, 2, 11, 9);

        let chunked = read_window_chunked(&reader, &window, 4).unwrap();
        assert_eq!(reader.reads.get(), 9);

        let direct = reader.read_window(&window).unwrap();
        assert_eq!(chunked, direct);
    }
}
