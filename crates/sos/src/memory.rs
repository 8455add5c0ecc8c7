use thiserror::Error;

use crate::ops::{INSTR_SIZE, Instruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address {address} is outside of RAM (size {size})")]
pub struct MemoryError {
    pub address: i32,
    pub size: usize,
}

/// Flat, word-addressed RAM. Only refuses addresses beyond its capacity;
/// process-level protection is the CPU's job.
pub struct Ram {
    cells: Vec<i32>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Self {
            cells: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    fn index(&self, address: i32, len: usize) -> Result<usize, MemoryError> {
        let err = MemoryError {
            address,
            size: self.cells.len(),
        };
        let start = usize::try_from(address).map_err(|_| err)?;
        match start.checked_add(len) {
            Some(end) if end <= self.cells.len() => Ok(start),
            _ => Err(err),
        }
    }

    pub fn read(&self, address: i32) -> Result<i32, MemoryError> {
        let index = self.index(address, 1)?;
        Ok(self.cells[index])
    }

    pub fn write(&mut self, address: i32, value: i32) -> Result<(), MemoryError> {
        let index = self.index(address, 1)?;
        self.cells[index] = value;
        Ok(())
    }

    /// Read the whole instruction starting at `address`.
    pub fn fetch(&self, address: i32) -> Result<Instruction, MemoryError> {
        let index = self.index(address, INSTR_SIZE)?;
        let words: [i32; INSTR_SIZE] = std::array::from_fn(|i| self.cells[index + i]);
        Ok(bytemuck::cast(words))
    }

    /// Copy `words` into RAM starting at `address`. Nothing is written if the
    /// block does not fit.
    pub fn load(&mut self, address: i32, words: &[i32]) -> Result<(), MemoryError> {
        let index = self.index(address, words.len())?;
        self.cells[index..index + words.len()].copy_from_slice(words);
        Ok(())
    }
}
