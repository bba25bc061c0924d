//! Raw binary output: the bytes of a single section, nothing else.

use crate::error::{AsmError, Result};
use crate::render::RenderCtx;

pub fn render_raw(ctx: &RenderCtx) -> Result<Vec<u8>> {
    if ctx.sections.len() != 1 {
        return Err(AsmError::RawMultipleSections { count: ctx.sections.len() });
    }
    let bytes = ctx.sections[0].bytes.clone();
    tracing::debug!(backend = "raw", bytes = bytes.len(), "serialisation complete");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pos;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_raw_single_section() {
        let mut ctx = RenderCtx::new();
        ctx.reorg(0x8000, &Pos::default()).unwrap();
        ctx.bytes(&[0xC9]);
        assert_eq!(render_raw(&ctx).unwrap(), vec![0xC9]);
    }

    #[test]
    fn test_raw_rejects_multiple_sections() {
        let mut ctx = RenderCtx::new();
        ctx.switch_section("other", None, None);
        assert!(render_raw(&ctx).is_err());
    }
}
