// tags.rs — tagged save file format
//
// Every save file is a version header followed by self-describing sections:
// [tag:u16][len:u32][payload]. Readers skip nothing and invent nothing: an
// unrecognized tag is corruption, a missing expected tag gets its default.
// All integers are little-endian.

use std::io::Cursor;
use std::path::Path;

use oubliette_common::marshal::{Reader, Writer};
use oubliette_common::{SaveError, SaveResult};

use crate::defs::*;
use crate::session::{GameSession, Direction, LevelEnv, VisitedLevels};

pub const SAVE_MAJOR_VERSION: u8 = 4;

/// Player file minor history:
///   1 — initial tagged format
///   2 — stealth hysteresis appended to the stats section
///   3 — quiver section added
pub const PLAYER_MINOR_VERSION: u8 = 3;
pub const LEVEL_MINOR_VERSION: u8 = 1;
pub const GHOST_MINOR_VERSION: u8 = 1;

/// Magic word in the extended bones header, ahead of the reserved padding.
pub const GHOST_SIGNATURE: u16 = 0xDC55;

// ============================================================
// Tag identifiers
// ============================================================

/// Section identifiers. Zero is the end-of-file sentinel and is never
/// written; readers treat it as a clean stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TagId {
    PlayerStats = 1,
    PlayerInventory = 2,
    PlayerDungeon = 3,
    PlayerQuiver = 4,

    LevelEnv = 10,
    LevelItems = 11,
    LevelMonsters = 12,
    LevelMarkers = 13,

    GhostRoster = 20,
}

impl TagId {
    pub fn from_u16(v: u16) -> Option<TagId> {
        Some(match v {
            1 => TagId::PlayerStats,
            2 => TagId::PlayerInventory,
            3 => TagId::PlayerDungeon,
            4 => TagId::PlayerQuiver,
            10 => TagId::LevelEnv,
            11 => TagId::LevelItems,
            12 => TagId::LevelMonsters,
            13 => TagId::LevelMarkers,
            20 => TagId::GhostRoster,
            _ => return None,
        })
    }
}

// ============================================================
// File kinds
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Player,
    Level,
    Ghost,
    /// Probe mode for the character chooser: reads the stats section and
    /// stops, so a whole directory can be scanned cheaply.
    PlayerNameOnly,
}

impl FileKind {
    pub fn minor_version(&self) -> u8 {
        match self {
            FileKind::Player | FileKind::PlayerNameOnly => PLAYER_MINOR_VERSION,
            FileKind::Level => LEVEL_MINOR_VERSION,
            FileKind::Ghost => GHOST_MINOR_VERSION,
        }
    }

    pub fn tags(&self) -> &'static [TagId] {
        match self {
            FileKind::Player => &[
                TagId::PlayerStats,
                TagId::PlayerInventory,
                TagId::PlayerDungeon,
                TagId::PlayerQuiver,
            ],
            FileKind::PlayerNameOnly => &[TagId::PlayerStats],
            FileKind::Level => &[
                TagId::LevelEnv,
                TagId::LevelItems,
                TagId::LevelMonsters,
                TagId::LevelMarkers,
            ],
            FileKind::Ghost => &[TagId::GhostRoster],
        }
    }

    pub fn first_tag_only(&self) -> bool {
        matches!(self, FileKind::PlayerNameOnly)
    }

    /// Bones files carry the extended header with signature and padding.
    pub fn extended_header(&self) -> bool {
        matches!(self, FileKind::Ghost)
    }
}

// ============================================================
// Headers and version gate
// ============================================================

pub fn write_header(w: &mut Writer, kind: FileKind) -> SaveResult<()> {
    w.write_u8(SAVE_MAJOR_VERSION)?;
    w.write_u8(kind.minor_version())?;
    if kind.extended_header() {
        w.write_u16(GHOST_SIGNATURE)?;
        for _ in 0..3 {
            w.write_u32(0)?;
        }
    }
    Ok(())
}

pub fn read_header(r: &mut Reader, kind: FileKind, path: &Path) -> SaveResult<(u8, u8)> {
    let major = r.read_u8().map_err(|e| e.with_path(path))?;
    let minor = r.read_u8().map_err(|e| e.with_path(path))?;
    if kind.extended_header() {
        let sig = r.read_u16().map_err(|e| e.with_path(path))?;
        if sig != GHOST_SIGNATURE {
            return Err(SaveError::MalformedStream {
                path: path.to_path_buf(),
                detail: format!("bad bones signature {:#06x}", sig),
            });
        }
        for _ in 0..3 {
            if r.read_u32().map_err(|e| e.with_path(path))? != 0 {
                return Err(SaveError::MalformedStream {
                    path: path.to_path_buf(),
                    detail: "nonzero reserved header field".to_string(),
                });
            }
        }
    }
    Ok((major, minor))
}

/// Reject the file before interpreting any section: a different major is a
/// different format, and a newer minor may contain sections we can't parse.
pub fn check_version(path: &Path, major: u8, minor: u8, kind: FileKind) -> SaveResult<()> {
    if major != SAVE_MAJOR_VERSION || minor > kind.minor_version() {
        return Err(SaveError::VersionMismatch {
            path: path.to_path_buf(),
            found_major: major,
            found_minor: minor,
            expected: SAVE_MAJOR_VERSION,
        });
    }
    Ok(())
}

// ============================================================
// Tag registry
// ============================================================

struct TagSpec {
    write: fn(&GameSession, &mut Writer) -> SaveResult<()>,
    read: fn(&mut GameSession, &mut Reader, u8) -> SaveResult<()>,
    fill_default: fn(&mut GameSession, u8),
}

fn tag_spec(tag: TagId) -> TagSpec {
    match tag {
        TagId::PlayerStats => TagSpec {
            write: write_player_stats,
            read: read_player_stats,
            fill_default: |sess, _| sess.you = crate::session::Player::default(),
        },
        TagId::PlayerInventory => TagSpec {
            write: write_player_inventory,
            read: read_player_inventory,
            fill_default: |sess, _| sess.you.inventory.clear(),
        },
        TagId::PlayerDungeon => TagSpec {
            write: write_player_dungeon,
            read: read_player_dungeon,
            fill_default: |sess, _| {
                sess.visited = VisitedLevels::default();
                sess.you.global_info = PlaceInfo::default();
                sess.you.place_info.clear();
            },
        },
        TagId::PlayerQuiver => TagSpec {
            write: write_player_quiver,
            read: read_player_quiver,
            fill_default: |sess, _| sess.you.quiver = None,
        },
        TagId::LevelEnv => TagSpec {
            write: write_level_env,
            read: read_level_env,
            fill_default: |sess, _| sess.env = LevelEnv::default(),
        },
        TagId::LevelItems => TagSpec {
            write: write_level_items,
            read: read_level_items,
            fill_default: |sess, _| sess.env.items.clear(),
        },
        TagId::LevelMonsters => TagSpec {
            write: write_level_monsters,
            read: read_level_monsters,
            fill_default: |sess, _| sess.env.monsters.clear(),
        },
        TagId::LevelMarkers => TagSpec {
            write: write_level_markers,
            read: read_level_markers,
            fill_default: |sess, _| {
                sess.env.clouds.clear();
                sess.env.markers.clear();
            },
        },
        TagId::GhostRoster => TagSpec {
            write: write_ghost_roster,
            read: read_ghost_roster,
            fill_default: |sess, _| sess.ghosts.clear(),
        },
    }
}

// ============================================================
// Tagged file read/write
// ============================================================

/// Serialize one section: payload is buffered first so the length prefix
/// is exact.
pub fn write_tag(session: &GameSession, w: &mut Writer, tag: TagId) -> SaveResult<()> {
    let mut payload = Vec::new();
    (tag_spec(tag).write)(session, &mut Writer::new(&mut payload))?;
    w.write_u16(tag as u16)?;
    w.write_u32(payload.len() as u32)?;
    w.write_raw(&payload)
}

/// Serialize a complete file of the given kind into a buffer.
pub fn write_save_buffer(session: &GameSession, kind: FileKind) -> SaveResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);
    write_header(&mut w, kind)?;
    for &tag in kind.tags() {
        write_tag(session, &mut w, tag)?;
    }
    Ok(buf)
}

/// Read sections until clean end of data or the zero sentinel. Expected
/// sections that never appeared get their defaults; a section that doesn't
/// belong to this file kind, or any short read, is corruption.
pub fn restore_tagged_file(
    session: &mut GameSession,
    r: &mut Reader,
    kind: FileKind,
    minor: u8,
    path: &Path,
) -> SaveResult<()> {
    let expected = kind.tags();
    let mut seen = vec![false; expected.len()];

    loop {
        let raw = match r.try_read_u16().map_err(|e| e.with_path(path))? {
            None => break,
            Some(0) => {
                // The sentinel must be the last thing in the file.
                if r.try_read_u16().map_err(|e| e.with_path(path))?.is_some() {
                    return Err(SaveError::MalformedStream {
                        path: path.to_path_buf(),
                        detail: "data past end-of-sections sentinel".to_string(),
                    });
                }
                break;
            }
            Some(v) => v,
        };
        let tag = TagId::from_u16(raw).ok_or_else(|| SaveError::MalformedStream {
            path: path.to_path_buf(),
            detail: format!("unrecognized section tag {}", raw),
        })?;
        let slot = expected
            .iter()
            .position(|&t| t == tag)
            .ok_or_else(|| SaveError::MalformedStream {
                path: path.to_path_buf(),
                detail: format!("section tag {} does not belong in this file", raw),
            })?;

        let len = r.read_u32().map_err(|e| e.with_path(path))? as usize;
        let payload = r.read_raw(len).map_err(|e| e.with_path(path))?;

        let mut cur = Cursor::new(payload);
        {
            let mut pr = Reader::new(&mut cur);
            (tag_spec(tag).read)(session, &mut pr, minor).map_err(|e| e.with_path(path))?;
        }
        if (cur.position() as usize) != len {
            return Err(SaveError::MalformedStream {
                path: path.to_path_buf(),
                detail: format!("section tag {} has trailing bytes", raw),
            });
        }
        seen[slot] = true;

        if kind.first_tag_only() {
            return Ok(());
        }
    }

    for (slot, &tag) in expected.iter().enumerate() {
        if !seen[slot] {
            (tag_spec(tag).fill_default)(session, minor);
        }
    }
    Ok(())
}

/// Parse a complete in-memory file: header, version gate, sections.
pub fn restore_save_buffer(
    session: &mut GameSession,
    bytes: &[u8],
    kind: FileKind,
    path: &Path,
) -> SaveResult<()> {
    let mut cur = Cursor::new(bytes);
    let mut r = Reader::new(&mut cur);
    let (major, minor) = read_header(&mut r, kind, path)?;
    check_version(path, major, minor, kind)?;
    restore_tagged_file(session, &mut r, kind, minor, path)
}

// ============================================================
// Section payloads
// ============================================================

fn write_player_stats(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    let you = &sess.you;
    w.write_string(&you.name)?;
    w.write_u8(you.species.to_u8())?;
    you.pos.write(w)?;
    w.write_i32(you.hp)?;
    w.write_i32(you.max_hp)?;
    w.write_u8(you.xl)?;
    w.write_u32(you.gold)?;
    w.write_i32(you.stealth)?;
    w.write_u32(you.items_lost)?;
    w.write_u8(you.branch.to_u8())?;
    w.write_u8(you.depth)?;
    w.write_u8(you.level_type.to_u8())?;
    w.write_u8(match you.char_direction {
        Direction::Descending => 0,
        Direction::Ascending => 1,
    })?;
    w.write_i32(you.elapsed_time)?;
    w.write_u8(you.abyss_entourage)?;
    // minor 2
    w.write_u8(you.stealth_hysteresis)
}

fn read_player_stats(sess: &mut GameSession, r: &mut Reader, minor: u8) -> SaveResult<()> {
    let you = &mut sess.you;
    you.name = r.read_string()?;
    you.species = Species::from_u8(r.read_u8()?)?;
    you.pos = Coord::read(r)?;
    you.hp = r.read_i32()?;
    you.max_hp = r.read_i32()?;
    you.xl = r.read_u8()?;
    you.gold = r.read_u32()?;
    you.stealth = r.read_i32()?;
    you.items_lost = r.read_u32()?;
    you.branch = Branch::from_u8(r.read_u8()?)?;
    you.depth = r.read_u8()?;
    you.level_type = LevelType::from_u8(r.read_u8()?)?;
    you.char_direction = match r.read_u8()? {
        0 => Direction::Descending,
        _ => Direction::Ascending,
    };
    you.elapsed_time = r.read_i32()?;
    you.abyss_entourage = r.read_u8()?;
    you.stealth_hysteresis = if minor >= 2 { r.read_u8()? } else { 0 };
    Ok(())
}

fn write_player_inventory(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    w.write_u32(sess.you.inventory.len() as u32)?;
    for item in &sess.you.inventory {
        item.write(w)?;
    }
    Ok(())
}

fn read_player_inventory(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    let count = r.read_u32()? as usize;
    let mut inventory = Vec::with_capacity(count);
    for _ in 0..count {
        inventory.push(Item::read(r)?);
    }
    sess.you.inventory = inventory;
    Ok(())
}

fn write_player_dungeon(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    sess.visited.write(w)?;
    sess.you.global_info.write(w)?;
    w.write_u32(sess.you.place_info.len() as u32)?;
    for (&(branch, level_type), info) in &sess.you.place_info {
        w.write_u8(branch)?;
        w.write_u8(level_type)?;
        info.write(w)?;
    }
    Ok(())
}

fn read_player_dungeon(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    sess.visited = VisitedLevels::read(r)?;
    sess.you.global_info = PlaceInfo::read(r)?;
    let count = r.read_u32()? as usize;
    sess.you.place_info.clear();
    for _ in 0..count {
        let branch = r.read_u8()?;
        let level_type = r.read_u8()?;
        sess.you
            .place_info
            .insert((branch, level_type), PlaceInfo::read(r)?);
    }
    Ok(())
}

fn write_player_quiver(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    match sess.you.quiver {
        Some(slot) => {
            w.write_bool(true)?;
            w.write_u8(slot)
        }
        None => w.write_bool(false),
    }
}

fn read_player_quiver(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    sess.you.quiver = if r.read_bool()? {
        Some(r.read_u8()?)
    } else {
        None
    };
    Ok(())
}

fn write_level_env(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    let env = &sess.env;
    let grid: Vec<u8> = env.grid.iter().map(|f| f.to_u8()).collect();
    w.write_raw(&grid)?;
    let seen: Vec<u8> = env.map_seen.iter().map(|&b| b as u8).collect();
    w.write_raw(&seen)?;
    w.write_i32(env.turns_on_level)?;
    w.write_i32(env.elapsed_time)?;
    match env.sanctuary_pos {
        Some(pos) => {
            w.write_bool(true)?;
            pos.write(w)?;
        }
        None => w.write_bool(false)?,
    }
    w.write_i32(env.sanctuary_time)
}

fn read_level_env(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    let env = &mut sess.env;
    let grid = r.read_raw(GXM * GYM)?;
    env.grid = grid
        .into_iter()
        .map(Feature::from_u8)
        .collect::<SaveResult<Vec<_>>>()?;
    let seen = r.read_raw(GXM * GYM)?;
    env.map_seen = seen.into_iter().map(|b| b != 0).collect();
    env.turns_on_level = r.read_i32()?;
    env.elapsed_time = r.read_i32()?;
    env.sanctuary_pos = if r.read_bool()? {
        Some(Coord::read(r)?)
    } else {
        None
    };
    env.sanctuary_time = r.read_i32()?;
    Ok(())
}

fn write_level_items(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    w.write_u32(sess.env.items.len() as u32)?;
    for item in &sess.env.items {
        item.write(w)?;
    }
    Ok(())
}

fn read_level_items(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    let count = r.read_u32()? as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(Item::read(r)?);
    }
    sess.env.items = items;
    Ok(())
}

fn write_level_monsters(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    let live: Vec<&Monster> = sess.env.monsters.iter().filter(|m| m.alive()).collect();
    w.write_u32(live.len() as u32)?;
    for monster in live {
        monster.write(w)?;
    }
    Ok(())
}

fn read_level_monsters(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    let count = r.read_u32()? as usize;
    let mut monsters = Vec::with_capacity(count);
    for _ in 0..count {
        monsters.push(Monster::read(r)?);
    }
    sess.env.monsters = monsters;
    Ok(())
}

fn write_level_markers(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    w.write_u32(sess.env.clouds.len() as u32)?;
    for cloud in &sess.env.clouds {
        cloud.write(w)?;
    }
    w.write_u32(sess.env.markers.len() as u32)?;
    for marker in &sess.env.markers {
        marker.write(w)?;
    }
    Ok(())
}

fn read_level_markers(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    let nclouds = r.read_u32()? as usize;
    let mut clouds = Vec::with_capacity(nclouds);
    for _ in 0..nclouds {
        clouds.push(Cloud::read(r)?);
    }
    let nmarkers = r.read_u32()? as usize;
    let mut markers = Vec::with_capacity(nmarkers);
    for _ in 0..nmarkers {
        markers.push(Marker::read(r)?);
    }
    sess.env.clouds = clouds;
    sess.env.markers = markers;
    Ok(())
}

fn write_ghost_roster(sess: &GameSession, w: &mut Writer) -> SaveResult<()> {
    w.write_u32(sess.ghosts.len() as u32)?;
    for ghost in &sess.ghosts {
        ghost.write(w)?;
    }
    Ok(())
}

fn read_ghost_roster(sess: &mut GameSession, r: &mut Reader, _minor: u8) -> SaveResult<()> {
    let count = r.read_u32()? as usize;
    let mut ghosts = Vec::with_capacity(count);
    for _ in 0..count {
        ghosts.push(GhostRecord::read(r)?);
    }
    sess.ghosts = ghosts;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SaveConfig;

    fn make_test_session() -> GameSession {
        let mut sess = GameSession::new(SaveConfig::default());
        sess.you.name = "Wizard".to_string();
        sess.you.species = Species::Centaur;
        sess.you.hp = 37;
        sess.you.gold = 412;
        sess.you.branch = Branch::Orc;
        sess.you.depth = 3;
        sess.you.quiver = Some(2);
        sess.you.stealth_hysteresis = 1;
        sess.you.inventory.push(Item::held(ItemKind::Potion));
        sess.visited.mark(LevelId::dungeon(Branch::Orc, 3));
        sess
    }

    #[test]
    fn test_player_file_round_trip() {
        let sess = make_test_session();
        let buf = write_save_buffer(&sess, FileKind::Player).unwrap();

        let mut back = GameSession::new(SaveConfig::default());
        restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("Wizard.sav")).unwrap();

        assert_eq!(back.you.name, "Wizard");
        assert_eq!(back.you.species, Species::Centaur);
        assert_eq!(back.you.gold, 412);
        assert_eq!(back.you.quiver, Some(2));
        assert_eq!(back.you.stealth_hysteresis, 1);
        assert_eq!(back.you.inventory.len(), 1);
        assert!(back.visited.contains(&LevelId::dungeon(Branch::Orc, 3)));
    }

    #[test]
    fn test_level_file_round_trip_drops_dead_monsters() {
        let mut sess = make_test_session();
        sess.env.set(Coord::new(4, 4), Feature::StoneStairsUpI);
        sess.env
            .monsters
            .push(Monster::new(MonsterKind::Ogre, Coord::new(6, 6), 30));
        let mut dead = Monster::new(MonsterKind::Rat, Coord::new(7, 7), 2);
        dead.hp = 0;
        sess.env.monsters.push(dead);
        sess.env.clouds.push(Cloud {
            pos: Coord::new(2, 2),
            kind: CloudKind::Fire,
            decay: 12,
        });

        let buf = write_save_buffer(&sess, FileKind::Level).unwrap();
        let mut back = GameSession::new(SaveConfig::default());
        restore_save_buffer(&mut back, &buf, FileKind::Level, Path::new("x.03o")).unwrap();

        assert_eq!(back.env.at(Coord::new(4, 4)), Feature::StoneStairsUpI);
        assert_eq!(back.env.monsters.len(), 1);
        assert_eq!(back.env.monsters[0].kind, MonsterKind::Ogre);
        assert_eq!(back.env.clouds.len(), 1);
    }

    #[test]
    fn test_missing_quiver_tag_fills_default() {
        // Hand-build a minor-2 player file: stats, inventory and dungeon
        // sections only, the way the previous release wrote them.
        let sess = make_test_session();
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf);
            w.write_u8(SAVE_MAJOR_VERSION).unwrap();
            w.write_u8(2).unwrap();
            write_tag(&sess, &mut w, TagId::PlayerStats).unwrap();
            write_tag(&sess, &mut w, TagId::PlayerInventory).unwrap();
            write_tag(&sess, &mut w, TagId::PlayerDungeon).unwrap();
        }

        let mut back = GameSession::new(SaveConfig::default());
        back.you.quiver = Some(9);
        restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("old.sav")).unwrap();

        assert_eq!(back.you.name, "Wizard");
        assert_eq!(back.you.quiver, None);
    }

    #[test]
    fn test_major_mismatch_rejected_before_tags() {
        let sess = make_test_session();
        let mut buf = write_save_buffer(&sess, FileKind::Player).unwrap();
        buf[0] = SAVE_MAJOR_VERSION + 1;
        // Garbage after the header must never be touched.
        buf.truncate(4);

        let mut back = GameSession::new(SaveConfig::default());
        let err =
            restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("new.sav"))
                .unwrap_err();
        match err {
            SaveError::VersionMismatch { found_major, .. } => {
                assert_eq!(found_major, SAVE_MAJOR_VERSION + 1)
            }
            other => panic!("expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_newer_minor_rejected() {
        let sess = make_test_session();
        let mut buf = write_save_buffer(&sess, FileKind::Player).unwrap();
        buf[1] = PLAYER_MINOR_VERSION + 1;

        let mut back = GameSession::new(SaveConfig::default());
        assert!(matches!(
            restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("s.sav")),
            Err(SaveError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_unrecognized_tag_is_corruption() {
        let sess = make_test_session();
        let mut buf = write_save_buffer(&sess, FileKind::Player).unwrap();
        {
            let mut w = Writer::new(&mut buf);
            w.write_u16(999).unwrap();
            w.write_u32(0).unwrap();
        }

        let mut back = GameSession::new(SaveConfig::default());
        assert!(matches!(
            restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("s.sav")),
            Err(SaveError::MalformedStream { .. })
        ));
    }

    #[test]
    fn test_truncated_section_is_corruption() {
        let sess = make_test_session();
        let mut buf = write_save_buffer(&sess, FileKind::Player).unwrap();
        buf.truncate(buf.len() - 3);

        let mut back = GameSession::new(SaveConfig::default());
        assert!(matches!(
            restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("s.sav")),
            Err(SaveError::MalformedStream { .. })
        ));
    }

    #[test]
    fn test_zero_sentinel_stops_cleanly() {
        let sess = make_test_session();
        let mut buf = write_save_buffer(&sess, FileKind::Player).unwrap();
        {
            let mut w = Writer::new(&mut buf);
            w.write_u16(0).unwrap();
        }

        let mut back = GameSession::new(SaveConfig::default());
        restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("s.sav")).unwrap();
        assert_eq!(back.you.name, "Wizard");
    }

    #[test]
    fn test_trailing_bytes_after_sentinel_are_corruption() {
        let sess = make_test_session();
        let mut buf = write_save_buffer(&sess, FileKind::Player).unwrap();
        {
            let mut w = Writer::new(&mut buf);
            w.write_u16(0).unwrap();
            w.write_raw(b"junk").unwrap();
        }

        let mut back = GameSession::new(SaveConfig::default());
        assert!(matches!(
            restore_save_buffer(&mut back, &buf, FileKind::Player, Path::new("s.sav")),
            Err(SaveError::MalformedStream { .. })
        ));

        // Even a single stray byte counts.
        let mut short = write_save_buffer(&sess, FileKind::Level).unwrap();
        {
            let mut w = Writer::new(&mut short);
            w.write_u16(0).unwrap();
            w.write_u8(7).unwrap();
        }
        let mut other = GameSession::new(SaveConfig::default());
        assert!(matches!(
            restore_save_buffer(&mut other, &short, FileKind::Level, Path::new("x.03o")),
            Err(SaveError::MalformedStream { .. })
        ));
    }

    #[test]
    fn test_ghost_header_round_trip_and_bad_signature() {
        let mut sess = make_test_session();
        sess.ghosts.push(GhostRecord {
            name: "Xtahua".to_string(),
            species: Species::Human,
            xl: 14,
            max_hp: 80,
            damage: 12,
        });

        let buf = write_save_buffer(&sess, FileKind::Ghost).unwrap();
        let mut back = GameSession::new(SaveConfig::default());
        restore_save_buffer(&mut back, &buf, FileKind::Ghost, Path::new("bones.03o")).unwrap();
        assert_eq!(back.ghosts.len(), 1);
        assert_eq!(back.ghosts[0].name, "Xtahua");

        let mut bad = buf.clone();
        bad[2] = 0;
        bad[3] = 0;
        let mut other = GameSession::new(SaveConfig::default());
        assert!(matches!(
            restore_save_buffer(&mut other, &bad, FileKind::Ghost, Path::new("bones.03o")),
            Err(SaveError::MalformedStream { .. })
        ));
    }

    #[test]
    fn test_name_only_probe_stops_after_stats() {
        let sess = make_test_session();
        let buf = write_save_buffer(&sess, FileKind::Player).unwrap();

        let mut probe = GameSession::new(SaveConfig::default());
        probe.you.inventory.push(Item::held(ItemKind::Wand));
        restore_save_buffer(&mut probe, &buf, FileKind::PlayerNameOnly, Path::new("s.sav"))
            .unwrap();

        assert_eq!(probe.you.name, "Wizard");
        // Inventory section was never read.
        assert_eq!(probe.you.inventory.len(), 1);
        assert_eq!(probe.you.inventory[0].kind, ItemKind::Wand);
    }
}
