use crate::error::LineError;

/// Máximo de bytes acumulados sin encontrar '\n'.
pub const MAX_PENDING: usize = 4096;

/// Ensambla líneas terminadas en '\n' a partir de fragmentos leídos del puerto.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial_data: Vec<u8>,
    /// Bytes de `partial_data` ya revisados, ninguno es '\n'.
    scanned: usize,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acumula `buffer` y devuelve cada línea completa, sin el terminador.
    /// Las líneas vacías (solo "\r" o "\n") se descartan. Si lo pendiente
    /// supera `MAX_PENDING`, se descarta y se devuelve `LineError::Overflow`.
    pub fn push(&mut self, buffer: &[u8]) -> Vec<Result<Vec<u8>, LineError>> {
        self.partial_data.extend_from_slice(buffer);

        let mut lineas = Vec::new();
        let mut inicio = 0;
        while let Some(off) = self.partial_data[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let fin = self.scanned + off;
            let mut completa = &self.partial_data[inicio..fin];
            if let Some((&b'\r', resto)) = completa.split_last() {
                completa = resto;
            }
            if !completa.is_empty() {
                lineas.push(Ok(completa.to_vec()));
            }
            inicio = fin + 1;
            self.scanned = inicio;
        }
        self.partial_data.drain(..inicio);
        self.scanned = self.partial_data.len();

        if self.partial_data.len() > MAX_PENDING {
            lineas.push(Err(LineError::Overflow {
                discarded: self.partial_data.len(),
            }));
            self.partial_data.clear();
            self.scanned = 0;
        }
        lineas
    }

    /// Bytes pendientes de una línea aún incompleta.
    pub fn pending(&self) -> &[u8] {
        &self.partial_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineas(asm: &mut LineAssembler, chunk: &[u8]) -> Vec<Vec<u8>> {
        asm.push(chunk).into_iter().map(|l| l.unwrap()).collect()
    }

    #[test]
    fn joins_fragments_across_reads() {
        let mut asm = LineAssembler::new();
        assert!(asm.push(b"bpm:").is_empty());
        assert_eq!(asm.pending(), b"bpm:");
        assert_eq!(lineas(&mut asm, b"72\r\noxy:9"), vec![b"bpm:72".to_vec()]);
        assert_eq!(lineas(&mut asm, b"8\n"), vec![b"oxy:98".to_vec()]);
        assert!(asm.pending().is_empty());
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut asm = LineAssembler::new();
        let l = lineas(&mut asm, b"a\n\r\n\nb\nc");
        assert_eq!(l, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(asm.pending(), b"c");
    }

    #[test]
    fn stream_without_newline_is_capped() {
        let mut asm = LineAssembler::new();
        let chunk = [b'x'; 1024];
        for _ in 0..4 {
            assert!(asm.push(&chunk).is_empty());
        }
        assert_eq!(asm.pending().len(), MAX_PENDING);

        let r = asm.push(b"yy");
        assert_eq!(
            r,
            vec![Err(LineError::Overflow {
                discarded: MAX_PENDING + 2
            })]
        );
        assert!(asm.pending().is_empty());

        // después del descarte se vuelve a ensamblar normalmente
        assert_eq!(lineas(&mut asm, b"bpm:70\n"), vec![b"bpm:70".to_vec()]);
    }

    #[test]
    fn cr_only_device_does_not_grow_forever() {
        let mut asm = LineAssembler::new();
        let mut descartes = 0;
        for _ in 0..10_000 {
            for r in asm.push(b"bpm:72\r") {
                assert!(matches!(r, Err(LineError::Overflow { .. })));
                descartes += 1;
            }
            assert!(asm.pending().len() <= MAX_PENDING);
        }
        assert!(descartes > 0);
    }
}
