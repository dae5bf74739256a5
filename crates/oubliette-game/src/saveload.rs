// saveload.rs — whole-game persistence
//
// The primary save file is sacred: failing to write or read it is fatal to
// the caller. Everything else — stash lists, kill counts, travel caches,
// notes, tutorial state, bones files — is best-effort and degrades to
// defaults, never to a crash.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use rand::Rng;

use oubliette_common::files::{
    check_dir, file_exists, get_dir_files, is_save_file_name, savedir_filename,
};
use oubliette_common::lock::{read_locked, replace_locked};
use oubliette_common::marshal::{Reader, Writer};
use oubliette_common::message::mpr;
use oubliette_common::package::{read_package, write_package, PACKAGE_EXT};
use oubliette_common::{SaveError, SaveResult};

use crate::defs::*;
use crate::session::{
    GameSession, KillTracker, Notes, Player, SaveConfig, ScriptState, StashTracker, TravelCache,
    Tutorial,
};
use crate::tags::{restore_save_buffer, write_save_buffer, FileKind};
use crate::transition::{enter_level, LoadMode};

pub const SAVE_EXT: &str = "sav";
pub const STASH_EXT: &str = "st";
pub const SCRIPT_EXT: &str = "lua";
pub const KILLS_EXT: &str = "kil";
pub const TRAVEL_EXT: &str = "tc";
pub const NOTES_EXT: &str = "nts";
pub const TUTORIAL_EXT: &str = "tut";

// ============================================================
// Paths
// ============================================================

pub fn player_file_path(config: &SaveConfig, name: &str, ext: &str) -> PathBuf {
    savedir_filename(&config.save_dir, name, "", ext, config.uid)
}

/// Level files use the level's suffix code as their extension, so one
/// character's levels sort together: "Wizard-1000.03o".
pub fn level_file_path(sess: &GameSession, level: &LevelId) -> PathBuf {
    savedir_filename(
        &sess.config.save_dir,
        &sess.you.name,
        "",
        &level.suffix(),
        sess.config.uid,
    )
}

/// Bones files are shared across users, so the uid is left off.
pub fn ghost_file_path(sess: &GameSession, level: &LevelId) -> PathBuf {
    savedir_filename(&sess.config.save_dir, "bones", "", &level.suffix(), None)
}

/// The character's bare file stem: stripped name plus uid tail, no extension.
fn character_base_name(config: &SaveConfig, name: &str) -> String {
    savedir_filename(Path::new(""), name, "", "", config.uid)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================
// Level files
// ============================================================

/// Write the session's environment to the named level's file. The level's
/// clock is stamped with the world clock so a later visit knows how long
/// the level sat idle.
pub fn save_level(sess: &mut GameSession, level: &LevelId) -> SaveResult<()> {
    sess.env.elapsed_time = sess.you.elapsed_time;
    sess.env.fix_item_coordinates();

    let buf = write_save_buffer(sess, FileKind::Level)?;
    let path = level_file_path(sess, level);
    replace_locked(&path, &buf, &sess.config.lock_policy).map_err(|source| {
        SaveError::IoUnavailable {
            path: path.clone(),
            source,
        }
    })
}

pub fn restore_level(sess: &mut GameSession, path: &Path) -> SaveResult<()> {
    let bytes =
        read_locked(path, &sess.config.lock_policy).map_err(|source| SaveError::IoUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
    restore_save_buffer(sess, &bytes, FileKind::Level, path)
}

// ============================================================
// Sidecar files
// ============================================================

fn write_aux_file(
    sess: &GameSession,
    ext: &str,
    write: &dyn Fn(&GameSession, &mut Writer) -> SaveResult<()>,
) {
    let mut buf = Vec::new();
    if write(sess, &mut Writer::new(&mut buf)).is_err() {
        return;
    }
    let path = player_file_path(&sess.config, &sess.you.name, ext);
    if let Err(err) = replace_locked(&path, &buf, &sess.config.lock_policy) {
        tracing::debug!(path = %path.display(), %err, "skipping sidecar save");
    }
}

fn read_aux_file<T>(
    sess: &GameSession,
    ext: &str,
    load: impl FnOnce(&mut Reader) -> SaveResult<T>,
) -> Option<T> {
    let path = player_file_path(&sess.config, &sess.you.name, ext);
    if !file_exists(&path) {
        return None;
    }
    let bytes = match read_locked(&path, &sess.config.lock_policy) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "skipping sidecar load");
            return None;
        }
    };
    let mut cur = Cursor::new(bytes);
    match load(&mut Reader::new(&mut cur)) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "discarding malformed sidecar");
            None
        }
    }
}

// ============================================================
// Whole-game save and restore
// ============================================================

/// Save the character. Sidecar files go first and are allowed to fail;
/// the primary file is not. When `exiting`, the current level is written
/// out too (unless a transition owns it), files are optionally bundled,
/// and a farewell is printed; the caller then ends the process.
pub fn save_game(sess: &mut GameSession, exiting: bool, farewell: Option<&str>) -> SaveResult<()> {
    sess.saving_game = true;
    let result = save_game_inner(sess, exiting, farewell);
    sess.saving_game = false;
    result
}

fn save_game_inner(sess: &mut GameSession, exiting: bool, farewell: Option<&str>) -> SaveResult<()> {
    if !check_dir("Save directory", &sess.config.save_dir, false) {
        return Err(SaveError::IoUnavailable {
            path: sess.config.save_dir.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "save directory missing"),
        });
    }

    write_aux_file(sess, STASH_EXT, &|s, w| s.stash_tracker.save(w));
    if sess.script_state.enabled {
        write_aux_file(sess, SCRIPT_EXT, &|s, w| s.script_state.save(w));
    }
    write_aux_file(sess, KILLS_EXT, &|s, w| s.kill_tracker.save(w));
    write_aux_file(sess, TRAVEL_EXT, &|s, w| s.travel_cache.save(w));
    write_aux_file(sess, NOTES_EXT, &|s, w| s.notes.save(w));
    write_aux_file(sess, TUTORIAL_EXT, &|s, w| s.tutorial.save(w));

    let buf = write_save_buffer(sess, FileKind::Player)?;
    let path = player_file_path(&sess.config, &sess.you.name, SAVE_EXT);
    replace_locked(&path, &buf, &sess.config.lock_policy).map_err(|source| {
        SaveError::IoUnavailable {
            path: path.clone(),
            source,
        }
    })?;

    if !exiting {
        return Ok(());
    }

    // A transition in flight owns the level; saving it here would write a
    // half-moved world.
    if !sess.you.entering_level {
        let current = sess.you.level_id();
        save_level(sess, &current)?;
    }

    if sess.config.package_on_exit {
        if let Err(err) = package_character_files(sess) {
            mpr(&format!("Warning: couldn't package save files ({}).", err));
        }
    }

    match farewell {
        Some(text) => mpr(text),
        None => mpr(&format!("See you soon, {}!", sess.you.name)),
    }
    Ok(())
}

/// Load the character from the primary file (fatal on failure), then the
/// sidecars (best-effort). The caller re-enters the saved level afterwards
/// with LoadMode::RestartGame.
pub fn restore_game(sess: &mut GameSession) -> SaveResult<()> {
    let path = player_file_path(&sess.config, &sess.you.name, SAVE_EXT);
    let bytes =
        read_locked(&path, &sess.config.lock_policy).map_err(|source| SaveError::IoUnavailable {
            path: path.clone(),
            source,
        })?;
    restore_save_buffer(sess, &bytes, FileKind::Player, &path)?;

    if let Some(stash) = read_aux_file(sess, STASH_EXT, StashTracker::load) {
        sess.stash_tracker = stash;
    }
    if let Some(script) = read_aux_file(sess, SCRIPT_EXT, ScriptState::load) {
        sess.script_state = script;
    }
    if let Some(kills) = read_aux_file(sess, KILLS_EXT, KillTracker::load) {
        sess.kill_tracker = kills;
    }
    if let Some(travel) = read_aux_file(sess, TRAVEL_EXT, TravelCache::load) {
        sess.travel_cache = travel;
    }
    if let Some(notes) = read_aux_file(sess, NOTES_EXT, Notes::load) {
        sess.notes = notes;
    }
    if let Some(tutorial) = read_aux_file(sess, TUTORIAL_EXT, Tutorial::load) {
        sess.tutorial = tutorial;
    }
    Ok(())
}

// ============================================================
// Character discovery
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSaveInfo {
    pub name: String,
    pub species: Species,
    pub xl: u8,
}

/// Peek at a save file for the character chooser: parse the header and the
/// stats section, ignore the rest. Unreadable or foreign-version files read
/// as None rather than an error; a menu shouldn't crash over one bad file.
pub fn read_character_info(path: &Path) -> Option<PlayerSaveInfo> {
    let bytes = fs::read(path).ok()?;
    let mut scratch = GameSession::new(SaveConfig::default());
    restore_save_buffer(&mut scratch, &bytes, FileKind::PlayerNameOnly, path).ok()?;
    Some(PlayerSaveInfo {
        name: scratch.you.name.clone(),
        species: scratch.you.species,
        xl: scratch.you.xl,
    })
}

/// Every readable character in the save directory, sorted by name.
pub fn find_saved_characters(config: &SaveConfig) -> Vec<PlayerSaveInfo> {
    let mut found = Vec::new();
    for name in get_dir_files(&config.save_dir) {
        if !is_save_file_name(&name, config.uid, SAVE_EXT) {
            continue;
        }
        if let Some(info) = read_character_info(&config.save_dir.join(&name)) {
            found.push(info);
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    found
}

// ============================================================
// Bones files
// ============================================================

fn player_ghost_record(you: &Player) -> GhostRecord {
    GhostRecord {
        name: you.name.clone(),
        species: you.species,
        xl: you.xl,
        max_hp: you.max_hp,
        damage: 4 + you.xl as i32,
    }
}

/// Leave the dead character's ghost behind for other games to find.
/// First writer wins: an existing bones file for this level is never
/// replaced. Returns whether a file was written.
pub fn save_ghost(sess: &mut GameSession, force: bool) -> bool {
    if !force && (sess.you.depth < sess.config.bones_min_depth || sess.you.species.is_undead()) {
        return false;
    }

    let level = sess.you.level_id();
    let path = ghost_file_path(sess, &level);
    if file_exists(&path) {
        return false;
    }

    sess.ghosts = vec![player_ghost_record(&sess.you)];
    let buf = match write_save_buffer(sess, FileKind::Ghost) {
        Ok(buf) => buf,
        Err(err) => {
            mpr(&format!("Error writing ghost file: {}", err));
            return false;
        }
    };
    if let Err(err) = replace_locked(&path, &buf, &sess.config.lock_policy) {
        mpr(&format!("Error writing ghost file: {}", err));
        return false;
    }
    true
}

/// Consume the bones file for the current level, if any, materializing its
/// ghosts as monsters. The file is removed whether it parsed or not: each
/// roster haunts exactly one game, and a corrupt one haunts none.
pub fn load_ghost(sess: &mut GameSession) {
    let level = sess.you.level_id();
    let path = ghost_file_path(sess, &level);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(_) => return,
    };

    match restore_save_buffer(sess, &bytes, FileKind::Ghost, &path) {
        Ok(()) => {
            let _ = fs::remove_file(&path);
            place_ghosts(sess);
        }
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "discarding unreadable bones file");
            sess.ghosts.clear();
            let _ = fs::remove_file(&path);
        }
    }
}

fn place_ghosts(sess: &mut GameSession) {
    let rosters: Vec<GhostRecord> = sess.ghosts.drain(..).collect();
    for record in rosters {
        let near = Coord::new(
            sess.rng.gen_range(1..GXM as i32 - 1),
            sess.rng.gen_range(1..GYM as i32 - 1),
        );
        if let Some(spot) = sess.env.nearest_floor(near, true) {
            let hp = (record.max_hp / 2).max(1);
            let mut ghost = Monster::new(MonsterKind::PlayerGhost, spot, hp);
            ghost.max_hp = record.max_hp;
            sess.env.monsters.push(ghost);
        }
    }
}

// ============================================================
// Cross-level visitors
// ============================================================

/// True if the level has been generated and its file is on disk. Only
/// dungeon levels persist; asking about any other kind is a caller bug.
pub fn is_existing_level(sess: &GameSession, level: &LevelId) -> bool {
    assert!(
        level.level_type == LevelType::Dungeon,
        "only dungeon levels persist between visits"
    );
    sess.visited.contains(level) && file_exists(&level_file_path(sess, level))
}

/// Run `op` against another level's state without disturbing the player:
/// the target is loaded in visitor mode, the closure may mutate it, the
/// target is saved back out, and the original level is reloaded after.
/// The closure's return value is a success signal passed through to the
/// caller, not a dirty flag. With `preserve_current` the current level is
/// saved before switching; otherwise in-memory changes to it are discarded.
pub fn apply_to_level<F>(
    sess: &mut GameSession,
    level: LevelId,
    preserve_current: bool,
    op: &mut F,
) -> SaveResult<bool>
where
    F: FnMut(&mut GameSession) -> bool,
{
    assert!(is_existing_level(sess, &level), "visiting an unbuilt level");

    let original = sess.you.level_id();
    let switched = level != original;

    if switched {
        if preserve_current {
            save_level(sess, &original)?;
        }
        set_player_place(sess, &level);
        enter_level(sess, Feature::StoneStairsDownI, LoadMode::Visitor, Some(original))?;
    }

    let success = op(sess);
    save_level(sess, &level)?;

    if switched {
        set_player_place(sess, &original);
        enter_level(sess, Feature::StoneStairsDownI, LoadMode::Visitor, Some(level))?;
    }

    Ok(success)
}

/// Apply `op` to every generated dungeon level, the current one included.
/// Returns whether any application reported success.
pub fn apply_to_all_dungeons<F>(sess: &mut GameSession, op: &mut F) -> SaveResult<bool>
where
    F: FnMut(&mut GameSession) -> bool,
{
    let current = sess.you.level_id();
    let levels: Vec<LevelId> = sess.visited.iter().copied().collect();
    let mut any = false;

    for level in levels {
        if !is_existing_level(sess, &level) {
            continue;
        }
        any |= if level == current {
            // Applied in place; write it out so every level file agrees.
            let ok = op(sess);
            save_level(sess, &level)?;
            ok
        } else {
            apply_to_level(sess, level, true, op)?
        };
    }
    Ok(any)
}

fn set_player_place(sess: &mut GameSession, level: &LevelId) {
    sess.you.branch = level.branch;
    sess.you.depth = level.depth;
    sess.you.level_type = level.level_type;
}

/// Read another level's explored map for travel planning, without touching
/// the live environment. None if the level has no file or was written by a
/// different release.
pub fn travel_load_map(
    sess: &GameSession,
    branch: Branch,
    depth: u8,
) -> SaveResult<Option<Vec<bool>>> {
    let level = LevelId::dungeon(branch, depth);
    let path = level_file_path(sess, &level);
    if !file_exists(&path) {
        return Ok(None);
    }

    let bytes =
        read_locked(&path, &sess.config.lock_policy).map_err(|source| SaveError::IoUnavailable {
            path: path.clone(),
            source,
        })?;
    let mut scratch = GameSession::new(sess.config.clone());
    match restore_save_buffer(&mut scratch, &bytes, FileKind::Level, &path) {
        Ok(()) => Ok(Some(scratch.env.map_seen)),
        Err(SaveError::VersionMismatch { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

// ============================================================
// Packaging and cleanup
// ============================================================

/// Bundle every file belonging to the character into one compressed
/// package next to the originals.
pub fn package_character_files(sess: &GameSession) -> SaveResult<()> {
    let base = character_base_name(&sess.config, &sess.you.name);
    let prefix = format!("{}.", base);

    let mut entries = Vec::new();
    for name in get_dir_files(&sess.config.save_dir) {
        if !name.starts_with(&prefix) || name.ends_with(&format!(".{}", PACKAGE_EXT)) {
            continue;
        }
        let data = fs::read(sess.config.save_dir.join(&name))?;
        entries.push((name, data));
    }

    let bundle = sess
        .config
        .save_dir
        .join(format!("{}.{}", base, PACKAGE_EXT));
    write_package(&bundle, &entries)
}

/// Restore a character's files from their package. Loose files already in
/// the save directory win over packaged copies. Returns whether a package
/// was found.
pub fn unpack_character_files(config: &SaveConfig, name: &str) -> SaveResult<bool> {
    let base = character_base_name(config, name);
    let bundle = config.save_dir.join(format!("{}.{}", base, PACKAGE_EXT));
    if !file_exists(&bundle) {
        return Ok(false);
    }
    for (entry, data) in read_package(&bundle)? {
        let path = config.save_dir.join(&entry);
        if !file_exists(&path) {
            fs::write(&path, data)?;
        }
    }
    Ok(true)
}

/// Delete every file belonging to the named character: the primary save,
/// sidecars, level files, and any package. Bones files stay; they belong
/// to the dungeon, not the character.
pub fn wipe_save(config: &SaveConfig, name: &str) {
    let base = character_base_name(config, name);
    let prefix = format!("{}.", base);
    for file in get_dir_files(&config.save_dir) {
        if file.starts_with(&prefix) {
            let _ = fs::remove_file(config.save_dir.join(file));
        }
    }
}
