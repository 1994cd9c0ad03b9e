use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

/// Nodo de una [`OrderedList`].
///
/// El payload vive detrás de su propio `RwLock`, así una actualización de
/// datos en un nodo no bloquea el recorrido por el resto de la lista. Los
/// enlaces estructurales tienen su propio lock; toda mutación estructural
/// se serializa además con el lock de la lista.
#[derive(Debug)]
pub struct Node<T> {
    key: String,
    payload: RwLock<T>,
    links: Mutex<Links<T>>,
}

#[derive(Debug)]
struct Links<T> {
    prev: Weak<Node<T>>,
    next: Option<Arc<Node<T>>>,
}

impl<T> Node<T> {
    pub fn new(key: impl Into<String>, payload: T) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            payload: RwLock::new(payload),
            links: Mutex::new(Links {
                prev: Weak::new(),
                next: None,
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Siguiente nodo. Solo toma el lock de enlaces de este nodo, por lo que
    /// un recorrido largo no es atómico como un todo.
    pub fn next(&self) -> Option<Arc<Node<T>>> {
        self.links.lock().next.clone()
    }

    pub fn prev(&self) -> Option<Arc<Node<T>>> {
        self.links.lock().prev.upgrade()
    }

    /// Reemplaza el payload sin mover el nodo de posición.
    pub fn set_payload(&self, value: T) {
        *self.payload.write() = value;
    }

    pub fn update_payload(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.payload.write());
    }

    pub fn with_payload<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.payload.read())
    }
}

impl<T: Clone> Node<T> {
    pub fn payload(&self) -> T {
        self.payload.read().clone()
    }
}

#[derive(Debug)]
struct ListState<T> {
    head: Option<Arc<Node<T>>>,
    tail: Option<Arc<Node<T>>>,
    len: usize,
}

/// Lista doblemente enlazada indexada por clave, con un cursor móvil para
/// el recorrido cíclico.
///
/// El cursor se guarda como clave y se resuelve por búsqueda en cada
/// avance; al borrar el nodo bajo el cursor éste se re-ubica en su sucesor.
/// Invariantes: claves únicas (responsabilidad del llamador); una lista no
/// vacía siempre tiene head y tail; el cursor o está vacío o nombra un nodo
/// presente en la lista.
#[derive(Debug)]
pub struct OrderedList<T> {
    state: Mutex<ListState<T>>,
    // Orden de locks: cursor antes que state, en todas las rutas.
    cursor: Mutex<Option<String>>,
}

impl<T> Default for OrderedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrderedList<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListState {
                head: None,
                tail: None,
                len: 0,
            }),
            cursor: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<Arc<Node<T>>> {
        self.state.lock().head.clone()
    }

    pub fn last(&self) -> Option<Arc<Node<T>>> {
        self.state.lock().tail.clone()
    }

    /// Inserta al principio de la lista.
    pub fn insert_first(&self, node: Arc<Node<T>>) {
        let mut state = self.state.lock();
        match state.head.clone() {
            Some(head) => Self::splice_before(&mut state, &head, node),
            None => Self::install_sole(&mut state, node),
        }
    }

    /// Inserta al final de la lista.
    pub fn insert_last(&self, node: Arc<Node<T>>) {
        let mut state = self.state.lock();
        match state.tail.clone() {
            Some(tail) => Self::splice_after(&mut state, &tail, node),
            None => Self::install_sole(&mut state, node),
        }
    }

    /// Empalma `new` antes de `node` en O(1), dado el handle del nodo.
    pub fn insert_before(&self, node: &Arc<Node<T>>, new: Arc<Node<T>>) {
        let mut state = self.state.lock();
        Self::splice_before(&mut state, node, new);
    }

    /// Empalma `new` después de `node` en O(1), dado el handle del nodo.
    pub fn insert_after(&self, node: &Arc<Node<T>>, new: Arc<Node<T>>) {
        let mut state = self.state.lock();
        Self::splice_after(&mut state, node, new);
    }

    /// Búsqueda lineal desde head por clave.
    pub fn find(&self, key: &str) -> Option<Arc<Node<T>>> {
        let mut current = self.first();
        while let Some(node) = current {
            if node.key() == key {
                return Some(node);
            }
            current = node.next();
        }
        None
    }

    /// Borra el nodo con la clave dada. Si el cursor apuntaba a ese nodo,
    /// queda re-ubicado en su sucesor (o vacío si era el tail).
    pub fn delete(&self, key: &str) -> bool {
        let mut cursor = self.cursor.lock();
        let mut state = self.state.lock();

        let mut current = state.head.clone();
        let node = loop {
            match current {
                Some(n) if n.key() == key => break n,
                Some(n) => current = n.next(),
                None => return false,
            }
        };

        let (prev, next) = {
            let links = node.links.lock();
            (links.prev.upgrade(), links.next.clone())
        };

        match &prev {
            Some(p) => p.links.lock().next = next.clone(),
            None => state.head = next.clone(),
        }
        match &next {
            Some(n) => {
                n.links.lock().prev = prev.as_ref().map(Arc::downgrade).unwrap_or_default()
            }
            None => state.tail = prev.clone(),
        }
        {
            let mut links = node.links.lock();
            links.prev = Weak::new();
            links.next = None;
        }
        state.len -= 1;

        if cursor.as_deref() == Some(key) {
            *cursor = next.map(|n| n.key().to_string());
        }
        true
    }

    /// Nodo sobre el que descansa el cursor, sin avanzarlo. Un cursor vacío
    /// sobre una lista no vacía se resuelve al head.
    pub fn cursor_peek(&self) -> Option<Arc<Node<T>>> {
        let mut cursor = self.cursor.lock();
        self.resolve_cursor(&mut cursor)
    }

    /// Devuelve el nodo del cursor y lo mueve a su sucesor. Pasado el tail
    /// el cursor queda vacío, con lo que el próximo avance envuelve al head:
    /// la lista se comporta como circular.
    pub fn cursor_advance(&self) -> Option<Arc<Node<T>>> {
        let mut cursor = self.cursor.lock();
        let node = self.resolve_cursor(&mut cursor)?;
        *cursor = node.next().map(|n| n.key().to_string());
        Some(node)
    }

    pub fn cursor_reset(&self) {
        *self.cursor.lock() = None;
    }

    fn resolve_cursor(&self, cursor: &mut Option<String>) -> Option<Arc<Node<T>>> {
        let node = match cursor.as_deref() {
            Some(key) => self.find(key).or_else(|| self.first()),
            None => self.first(),
        }?;
        *cursor = Some(node.key().to_string());
        Some(node)
    }

    /// Copia de los handles actuales en orden, para listados y persistencia.
    /// No es un snapshot atómico frente a mutación estructural concurrente.
    pub fn nodes(&self) -> Vec<Arc<Node<T>>> {
        let mut out = Vec::with_capacity(self.len());
        let mut current = self.first();
        while let Some(node) = current {
            current = node.next();
            out.push(node);
        }
        out
    }

    fn install_sole(state: &mut ListState<T>, node: Arc<Node<T>>) {
        {
            let mut links = node.links.lock();
            links.prev = Weak::new();
            links.next = None;
        }
        state.head = Some(Arc::clone(&node));
        state.tail = Some(node);
        state.len += 1;
    }

    fn splice_before(state: &mut ListState<T>, node: &Arc<Node<T>>, new: Arc<Node<T>>) {
        let prev = node.links.lock().prev.upgrade();
        {
            let mut links = new.links.lock();
            links.next = Some(Arc::clone(node));
            links.prev = prev.as_ref().map(Arc::downgrade).unwrap_or_default();
        }
        match &prev {
            Some(p) => p.links.lock().next = Some(Arc::clone(&new)),
            None => state.head = Some(Arc::clone(&new)),
        }
        node.links.lock().prev = Arc::downgrade(&new);
        state.len += 1;
    }

    fn splice_after(state: &mut ListState<T>, node: &Arc<Node<T>>, new: Arc<Node<T>>) {
        let next = node.links.lock().next.clone();
        {
            let mut links = new.links.lock();
            links.prev = Arc::downgrade(node);
            links.next = next.clone();
        }
        match &next {
            Some(n) => n.links.lock().prev = Arc::downgrade(&new),
            None => state.tail = Some(Arc::clone(&new)),
        }
        node.links.lock().next = Some(new);
        state.len += 1;
    }
}
