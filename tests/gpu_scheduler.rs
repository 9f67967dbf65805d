/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use compositor_host::gl_context::{ATTRIB_NONE, ATTRIB_SAMPLES, ATTRIB_SAMPLE_BUFFERS};
use compositor_host::{CommandBuffer, CommandId, ContextError, ContextState, DecoderError};
use compositor_host::{GpuScheduler, HeadlessContextFactory, NativeWindow, SchedulerError};
use euclid::size2;
use std::cell::RefCell;
use std::rc::Rc;

const THUMBNAIL_TEXTURE: u32 = 17;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn factory() -> Rc<HeadlessContextFactory> {
    Rc::new(HeadlessContextFactory::new(size2(1024, 768)))
}

fn scheduler(factory: &Rc<HeadlessContextFactory>) -> GpuScheduler {
    GpuScheduler::new(CommandBuffer::new(64), factory.clone())
}

fn view_scheduler(factory: &Rc<HeadlessContextFactory>) -> GpuScheduler {
    let mut scheduler = scheduler(factory);
    scheduler.initialize(Some(NativeWindow(0x10)), size2(0, 0), "", "*", &[], None, 0)
             .unwrap();
    scheduler
}

fn backing_texture(scheduler: &GpuScheduler) -> Option<u32> {
    scheduler.decoder().borrow().gl_context().and_then(|context| context.backing_texture())
}

#[test]
fn view_context_cannot_have_a_parent() {
    init_logging();
    let factory = factory();
    let parent = view_scheduler(&factory);
    let mut child = scheduler(&factory);
    assert_eq!(child.initialize(Some(NativeWindow(0x20)), size2(0, 0), "", "*", &[],
                                Some(&parent), THUMBNAIL_TEXTURE),
               Err(SchedulerError::ViewContextWithParent));
    assert!(child.decoder().borrow().gl_context().is_none());
    assert_eq!(factory.stats().contexts_created.get(), 1);
}

#[test]
fn parent_without_context_is_rejected() {
    init_logging();
    let factory = factory();
    let parent = scheduler(&factory);
    let mut child = scheduler(&factory);
    assert_eq!(child.initialize(None, size2(256, 256), "", "*", &[],
                                Some(&parent), THUMBNAIL_TEXTURE),
               Err(SchedulerError::ParentHasNoContext));
    assert_eq!(factory.stats().contexts_created.get(), 0);
}

#[test]
fn creation_failure_keeps_no_state() {
    init_logging();
    let factory = factory();
    factory.set_fail_creation(true);
    let mut scheduler = scheduler(&factory);
    assert_eq!(scheduler.initialize(None, size2(64, 64), "", "*", &[], None, 0),
               Err(SchedulerError::ContextCreationFailed));
    assert!(scheduler.decoder().borrow().gl_context().is_none());

    factory.set_fail_creation(false);
    scheduler.initialize(None, size2(64, 64), "", "*", &[], None, 0).unwrap();
    assert_eq!(scheduler.decoder().borrow().gl_context().map(|context| context.state()),
               Some(ContextState::Current));
    scheduler.destroy();
}

#[test]
fn bad_attribute_list_fails_before_creating_anything() {
    let factory = factory();
    let mut scheduler = scheduler(&factory);
    assert_eq!(scheduler.initialize(None, size2(64, 64), "", "*", &[ATTRIB_SAMPLES], None, 0),
               Err(SchedulerError::Context(ContextError::MissingAttributeValue(ATTRIB_SAMPLES))));
    assert_eq!(factory.stats().contexts_created.get(), 0);

    let attribs = [ATTRIB_SAMPLES, 4, ATTRIB_SAMPLE_BUFFERS, 1, ATTRIB_NONE];
    scheduler.initialize(Some(NativeWindow(1)), size2(0, 0), "", "*", &attribs, None, 0)
             .unwrap();
    assert_eq!(scheduler.initialize(None, size2(64, 64), "", "*", &[], None, 0),
               Err(SchedulerError::AlreadyInitialized));
    scheduler.destroy();
}

#[test]
fn child_texture_is_visible_in_the_parent() {
    init_logging();
    let factory = factory();
    let mut parent = view_scheduler(&factory);
    let mut child = scheduler(&factory);
    child.initialize(None, size2(256, 160), "", "*", &[], Some(&parent), THUMBNAIL_TEXTURE)
         .unwrap();

    {
        let parent_decoder = parent.decoder();
        let child_decoder = child.decoder();
        let parent_decoder = parent_decoder.borrow();
        let child_decoder = child_decoder.borrow();
        let parent_context = parent_decoder.gl_context().unwrap();
        let child_context = child_decoder.gl_context().unwrap();
        assert!(child_context.is_offscreen());
        assert!(child_context.share_group().is_same_group(&parent_context.share_group()));
    }
    let texture = backing_texture(&child);
    assert!(texture.is_some());
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), texture);

    // Resizing hands the parent the new color buffer under the same id.
    child.resize_offscreen_frame_buffer(size2(512, 320)).unwrap();
    let resized = backing_texture(&child);
    assert_ne!(resized, texture);
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), resized);

    child.destroy();
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), None);
    parent.destroy();
    assert_eq!(factory.stats().contexts_destroyed.get(), 2);
}

#[test]
fn parent_texture_id_can_only_be_bound_once() {
    init_logging();
    let factory = factory();
    let mut parent = view_scheduler(&factory);
    let mut first = scheduler(&factory);
    first.initialize(None, size2(32, 32), "", "*", &[], Some(&parent), THUMBNAIL_TEXTURE)
         .unwrap();

    let mut second = scheduler(&factory);
    assert_eq!(second.initialize(None, size2(32, 32), "", "*", &[],
                                 Some(&parent), THUMBNAIL_TEXTURE),
               Err(SchedulerError::Decoder(DecoderError::ParentTextureInUse(THUMBNAIL_TEXTURE))));
    assert!(second.decoder().borrow().gl_context().is_none());
    assert_eq!(factory.stats().contexts_destroyed.get(), 1);

    assert_eq!(second.initialize(None, size2(32, 32), "", "*", &[], Some(&parent), 0),
               Err(SchedulerError::Decoder(DecoderError::InvalidParentTexture(0))));

    first.destroy();
    parent.destroy();
}

#[test]
fn child_outlives_its_parent() {
    init_logging();
    let factory = factory();
    let mut child = scheduler(&factory);
    {
        let mut parent = view_scheduler(&factory);
        child.initialize(None, size2(32, 32), "", "*", &[], Some(&parent), THUMBNAIL_TEXTURE)
             .unwrap();
        parent.destroy();
    }

    child.resize_offscreen_frame_buffer(size2(64, 64)).unwrap();
    child.destroy();
    assert_eq!(factory.stats().contexts_destroyed.get(), 2);
}

#[test]
fn swap_callback_runs_once_per_swap_before_it() {
    init_logging();
    let factory = factory();
    let mut scheduler = view_scheduler(&factory);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let log = seen.clone();
    let stats = factory.clone();
    scheduler.set_swap_buffers_callback(move || {
        log.borrow_mut().push(stats.stats().swaps.get());
    });

    for token in 1 .. 4 {
        let buffer = scheduler.command_buffer_mut();
        assert!(buffer.push(CommandId::SwapBuffers, &[]));
        assert!(buffer.push(CommandId::SetToken, &[token]));
        let put = buffer.write_offset();
        let state = scheduler.put_changed(put);
        assert_eq!(state.error, None);
        assert_eq!(state.token, token as i32);
    }

    assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    assert_eq!(factory.stats().swaps.get(), 3);
    scheduler.destroy();
}

#[test]
fn commands_wrap_around_the_ring() {
    let factory = factory();
    let mut scheduler = GpuScheduler::new(CommandBuffer::new(8), factory.clone());
    scheduler.initialize(None, size2(16, 16), "", "*", &[], None, 0).unwrap();

    for token in 0 .. 10 {
        let buffer = scheduler.command_buffer_mut();
        assert!(buffer.push(CommandId::ResizeOffscreen, &[16 + token, 16]));
        assert!(buffer.push(CommandId::SetToken, &[token]));
        let put = buffer.write_offset();
        let state = scheduler.put_changed(put);
        assert_eq!(state.error, None);
        assert_eq!(state.get_offset, put);
        assert_eq!(state.token, token as i32);
    }
    assert_eq!(scheduler.decoder().borrow().gl_context().unwrap().size(), size2(25, 16));
    scheduler.destroy();
}

#[test]
fn destroyed_parent_drops_stale_texture_links() {
    init_logging();
    let factory = factory();
    let mut parent = view_scheduler(&factory);
    let mut old_child = scheduler(&factory);
    old_child.initialize(None, size2(32, 32), "", "*", &[], Some(&parent), THUMBNAIL_TEXTURE)
             .unwrap();

    // The parent scheduler stays alive, only its context goes away.
    parent.destroy();
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), None);
    old_child.resize_offscreen_frame_buffer(size2(16, 16)).unwrap();
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), None);

    parent.initialize(Some(NativeWindow(0x30)), size2(0, 0), "", "*", &[], None, 0).unwrap();
    let mut new_child = scheduler(&factory);
    new_child.initialize(None, size2(32, 32), "", "*", &[], Some(&parent), THUMBNAIL_TEXTURE)
             .unwrap();
    let texture = backing_texture(&new_child);
    assert!(texture.is_some());
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), texture);

    // The old child must not take the new child's binding with it.
    old_child.resize_offscreen_frame_buffer(size2(24, 24)).unwrap();
    old_child.destroy();
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), texture);

    new_child.destroy();
    assert_eq!(parent.decoder().borrow().shared_texture(THUMBNAIL_TEXTURE), None);
    parent.destroy();
}
