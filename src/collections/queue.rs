use parking_lot::Mutex;
use std::collections::VecDeque;

/// Cola FIFO con un único lock grueso.
///
/// Todas las operaciones son seguras para llamadores concurrentes; head,
/// tail y longitud se mueven juntos bajo el mismo lock. Bajo contención solo
/// se garantiza la serialización, no que el orden de llegada coincida con el
/// reloj de pared de cada llamador.
#[derive(Debug)]
pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Agrega un elemento al final de la cola.
    pub fn push(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    /// Saca y devuelve el elemento más antiguo, o `None` si está vacía.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: Clone> Queue<T> {
    /// Devuelve el elemento más antiguo sin sacarlo.
    pub fn peek(&self) -> Option<T> {
        self.inner.lock().front().cloned()
    }

    /// Copia del contenido actual en orden de llegada, para listados.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().iter().cloned().collect()
    }
}
