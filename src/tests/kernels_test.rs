use crate::context::{Context, ContextConfig};
use crate::error::CacheError;
use crate::kernels::{BroadcastAdd, ElemwiseCopy};

fn cpu_broadcast_add(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().enumerate().map(|(i, x)| x + b[i % b.len()]).collect()
}

fn kernel_context() -> Context {
    Context::new(ContextConfig {
        total_device_memory: 64 * 1024,
        utilization_fraction: 0.75,
    })
    .expect("valid config")
}

#[test]
fn test_copy_requires_explicit_synchronization() -> Result<(), CacheError> {
    let mut ctx = kernel_context();
    let src = ctx.device.new_buffer_with_bytes(&[1, 2, 3, 4])?;
    let dst = ctx.device.new_buffer(4)?;

    ctx.copy_buffer(&src, &dst)?;
    // Dispatch is asynchronous: nothing runs until synchronize().
    assert_eq!(dst.contents(), vec![0, 0, 0, 0]);

    ctx.synchronize()?;
    assert_eq!(dst.contents(), vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_copy_length_mismatch_rejected_at_record_time() -> Result<(), CacheError> {
    let mut ctx = kernel_context();
    let src = ctx.device.new_buffer(8)?;
    let dst = ctx.device.new_buffer(4)?;
    assert!(matches!(
        ctx.copy_buffer(&src, &dst),
        Err(CacheError::LengthMismatch { expected: 8, actual: 4 })
    ));
    Ok(())
}

#[test]
fn test_broadcast_add_matches_cpu_reference() -> Result<(), CacheError> {
    let mut ctx = kernel_context();
    let a_data: Vec<f32> = (0..12).map(|i| i as f32).collect();
    let b_data = vec![0.5, 1.5, 2.5, 3.5];

    let a = ctx.device.new_buffer(48)?;
    a.write_f32(&a_data)?;
    let b = ctx.device.new_buffer(16)?;
    b.write_f32(&b_data)?;
    let out = ctx.device.new_buffer(48)?;

    ctx.broadcast_add(&a, &b, &out)?;
    ctx.synchronize()?;
    assert_eq!(out.read_f32(), cpu_broadcast_add(&a_data, &b_data));
    Ok(())
}

#[test]
fn test_broadcast_operand_must_divide() -> Result<(), CacheError> {
    let ctx = kernel_context();
    let a = ctx.device.new_buffer(48)?;
    let b = ctx.device.new_buffer(20)?;
    let out = ctx.device.new_buffer(48)?;
    assert!(matches!(
        BroadcastAdd::new(a, b, out),
        Err(CacheError::InvalidShape(_))
    ));
    Ok(())
}

#[test]
fn test_operations_run_in_submission_order() -> Result<(), CacheError> {
    let mut ctx = kernel_context();
    let first = ctx.device.new_buffer_with_bytes(&7u32.to_le_bytes())?;
    let second = ctx.device.new_buffer(4)?;
    let third = ctx.device.new_buffer(4)?;

    // first -> second -> third must chain through one command buffer.
    ctx.copy_buffer(&first, &second)?;
    ctx.copy_buffer(&second, &third)?;
    ctx.synchronize()?;
    assert_eq!(third.contents(), 7u32.to_le_bytes());
    Ok(())
}

#[test]
fn test_record_after_commit_is_rejected() -> Result<(), CacheError> {
    let ctx = kernel_context();
    let queue = ctx.device.new_command_queue();
    let cmd_buf = queue.command_buffer();
    let src = ctx.device.new_buffer(4)?;
    let dst = ctx.device.new_buffer(4)?;

    cmd_buf.commit()?;
    cmd_buf.wait();
    assert!(cmd_buf.is_completed());

    let op = ElemwiseCopy::new(src, dst)?;
    assert!(matches!(
        cmd_buf.record(Box::new(op)),
        Err(CacheError::CommandBufferCommitted)
    ));
    Ok(())
}
