// session.rs — the game state threaded through every save/load entry point
//
// There are no globals here: the whole mutable world hangs off GameSession
// and every operation takes &mut GameSession. Tests build a scratch session,
// run the real entry points against a temp directory, and inspect the result.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use oubliette_common::lock::LockPolicy;
use oubliette_common::marshal::{Reader, Writer};
use oubliette_common::SaveResult;

use crate::defs::*;

// ============================================================
// Configuration
// ============================================================

/// Tunables for the persistence layer. The defaults match classic behavior;
/// tests and frontends override individual fields.
#[derive(Debug, Clone)]
pub struct SaveConfig {
    pub save_dir: PathBuf,
    /// Multi-user disambiguator appended to per-character filenames.
    /// Bones files never carry it; they are shared across users.
    pub uid: Option<u32>,
    /// One-in-N chance a freshly generated level consumes a bones file.
    /// Zero disables consumption entirely.
    pub ghost_chance: u32,
    /// Shallowest dungeon depth at which bones are written or consumed.
    pub bones_min_depth: u8,
    /// Base arrival cost after taking a stair, in time units.
    pub base_move_cost: i32,
    /// Flat override for stair-clumsy species.
    pub clumsy_stair_cost: i32,
    /// Stealth is divided by this and subtracted from the arrival cost.
    pub stealth_cost_divisor: i32,
    /// Bundle the character's files into a package on final save.
    pub package_on_exit: bool,
    pub lock_policy: LockPolicy,
}

impl Default for SaveConfig {
    fn default() -> SaveConfig {
        SaveConfig {
            save_dir: PathBuf::from("."),
            uid: None,
            ghost_chance: 3,
            bones_min_depth: 2,
            base_move_cost: 10,
            clumsy_stair_cost: 15,
            stealth_cost_divisor: 10,
            package_on_exit: false,
            lock_policy: LockPolicy::default(),
        }
    }
}

// ============================================================
// Player
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Descending,
    Ascending,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub species: Species,
    pub pos: Coord,
    pub hp: i32,
    pub max_hp: i32,
    pub xl: u8,
    pub gold: u32,
    pub stealth: i32,
    /// Running count of items abandoned on collapsing levels.
    pub items_lost: u32,

    pub branch: Branch,
    pub depth: u8,
    pub level_type: LevelType,
    pub char_direction: Direction,

    pub elapsed_time: i32,
    /// Cost of the action just performed, consumed by the turn loop.
    pub time_taken: i32,

    pub inventory: Vec<Item>,
    /// Inventory slot queued for quick-firing, if any.
    pub quiver: Option<u8>,
    /// Damps stealth-level flicker between recomputations.
    pub stealth_hysteresis: u8,
    /// Demon lords still chasing the player out of the Abyss; cleared on
    /// arrival at any freshly generated level.
    pub abyss_entourage: u8,

    pub global_info: PlaceInfo,
    pub place_info: BTreeMap<(u8, u8), PlaceInfo>,

    pub redraw: RedrawFlags,

    // Transition-scoped state, never serialized.
    pub transit_stair: Feature,
    pub entering_level: bool,
}

impl Default for Player {
    fn default() -> Player {
        Player {
            name: String::new(),
            species: Species::Human,
            pos: Coord::new(1, 1),
            hp: 10,
            max_hp: 10,
            xl: 1,
            gold: 0,
            stealth: 0,
            items_lost: 0,
            branch: Branch::Main,
            depth: 1,
            level_type: LevelType::Dungeon,
            char_direction: Direction::Descending,
            elapsed_time: 0,
            time_taken: 0,
            inventory: Vec::new(),
            quiver: None,
            stealth_hysteresis: 0,
            abyss_entourage: 0,
            global_info: PlaceInfo::default(),
            place_info: BTreeMap::new(),
            redraw: RedrawFlags::empty(),
            transit_stair: Feature::Floor,
            entering_level: false,
        }
    }
}

impl Player {
    pub fn level_id(&self) -> LevelId {
        LevelId {
            branch: self.branch,
            depth: self.depth,
            level_type: self.level_type,
        }
    }

    fn place_key(&self) -> (u8, u8) {
        (self.branch.to_u8(), self.level_type.to_u8())
    }

    /// Stats bucket for the player's current place, created on first touch.
    pub fn place_info_mut(&mut self) -> &mut PlaceInfo {
        self.place_info.entry(self.place_key()).or_default()
    }

    /// Flag every derived status line for recomputation. Called after a
    /// restore replaces the state those lines were computed from.
    pub fn redraw_all(&mut self) {
        self.redraw = RedrawFlags::all();
    }
}

// ============================================================
// Level environment
// ============================================================

/// Everything that lives on one level: terrain, the floor item table,
/// monsters, clouds and markers, plus this level's own clock.
pub struct LevelEnv {
    pub grid: Vec<Feature>,
    pub map_seen: Vec<bool>,
    pub items: Vec<Item>,
    pub monsters: Vec<Monster>,
    pub clouds: Vec<Cloud>,
    pub markers: Vec<Marker>,
    /// -1 while the level is still being generated.
    pub turns_on_level: i32,
    /// World clock at the moment this level was last left.
    pub elapsed_time: i32,
    pub sanctuary_pos: Option<Coord>,
    pub sanctuary_time: i32,
}

impl Default for LevelEnv {
    fn default() -> LevelEnv {
        LevelEnv {
            grid: vec![Feature::RockWall; GXM * GYM],
            map_seen: vec![false; GXM * GYM],
            items: Vec::new(),
            monsters: Vec::new(),
            clouds: Vec::new(),
            markers: Vec::new(),
            turns_on_level: 0,
            elapsed_time: 0,
            sanctuary_pos: None,
            sanctuary_time: 0,
        }
    }
}

impl LevelEnv {
    pub fn at(&self, pos: Coord) -> Feature {
        self.grid[pos.y as usize * GXM + pos.x as usize]
    }

    pub fn set(&mut self, pos: Coord, feat: Feature) {
        self.grid[pos.y as usize * GXM + pos.x as usize] = feat;
    }

    pub fn monster_at(&self, pos: Coord) -> Option<usize> {
        self.monsters
            .iter()
            .position(|m| m.alive() && m.pos == pos)
    }

    pub fn clear_clouds(&mut self) {
        self.clouds.clear();
    }

    pub fn clear_map(&mut self) {
        for seen in self.map_seen.iter_mut() {
            *seen = false;
        }
    }

    /// Position of the matching feature nearest to `near`, if any exists.
    pub fn find_feature(&self, feat: Feature, near: Coord) -> Option<Coord> {
        let mut best: Option<Coord> = None;
        for y in 0..GYM as i32 {
            for x in 0..GXM as i32 {
                let pos = Coord::new(x, y);
                if self.at(pos) != feat {
                    continue;
                }
                if best.map_or(true, |b| pos.dist2(&near) < b.dist2(&near)) {
                    best = Some(pos);
                }
            }
        }
        best
    }

    /// Nearest floor cell to `near`, optionally skipping occupied cells.
    pub fn nearest_floor(&self, near: Coord, skip_occupied: bool) -> Option<Coord> {
        let mut best: Option<Coord> = None;
        for y in 0..GYM as i32 {
            for x in 0..GXM as i32 {
                let pos = Coord::new(x, y);
                if self.at(pos) != Feature::Floor {
                    continue;
                }
                if skip_occupied && self.monster_at(pos).is_some() {
                    continue;
                }
                if best.map_or(true, |b| pos.dist2(&near) < b.dist2(&near)) {
                    best = Some(pos);
                }
            }
        }
        best
    }

    /// Rebuild the per-cell floor item chains. The stored link values are
    /// not trusted across a load; only position survives.
    pub fn link_items(&mut self) {
        for item in self.items.iter_mut() {
            item.link = None;
        }
        let mut head: BTreeMap<(i32, i32), u16> = BTreeMap::new();
        for idx in (0..self.items.len()).rev() {
            let pos = match self.items[idx].pos {
                Some(p) => p,
                None => continue,
            };
            let key = (pos.x, pos.y);
            self.items[idx].link = head.get(&key).copied();
            head.insert(key, idx as u16);
        }
    }

    /// Nail carried items down: anything in a monster's inventory must not
    /// claim a floor position, or the link rebuild would double-place it.
    pub fn fix_item_coordinates(&mut self) {
        let carried: Vec<u16> = self
            .monsters
            .iter()
            .flat_map(|m| m.items.iter().copied())
            .collect();
        for idx in carried {
            if let Some(item) = self.items.get_mut(idx as usize) {
                item.pos = None;
                item.link = None;
            }
        }
    }
}

// ============================================================
// Followers and transit
// ============================================================

/// A friendly creature caught mid-transition. Its carried items travel as
/// owned copies because item-table indices don't survive the level change.
pub struct Follower {
    pub monster: Monster,
    pub carried: Vec<Item>,
}

impl Follower {
    /// Pull `idx` out of the level, detaching its inventory from the item
    /// table. The level copies stay behind as dead weight until the next
    /// save drops them.
    pub fn extract(env: &mut LevelEnv, idx: usize) -> Follower {
        let mut monster = self_replace_dead(&mut env.monsters[idx]);
        let mut carried = Vec::new();
        for &slot in &monster.items {
            if let Some(item) = env.items.get_mut(slot as usize) {
                let mut taken = item.clone();
                taken.pos = None;
                taken.link = None;
                carried.push(taken);
                item.quantity = 0;
            }
        }
        monster.items.clear();
        Follower { monster, carried }
    }
}

fn self_replace_dead(slot: &mut Monster) -> Monster {
    std::mem::replace(slot, Monster::new(MonsterKind::Rat, Coord::new(0, 0), 0))
}

// ============================================================
// Visited levels
// ============================================================

/// Set of dungeon levels whose files exist on disk. Only proper dungeon
/// levels are tracked; special level types always regenerate.
#[derive(Default)]
pub struct VisitedLevels {
    set: BTreeSet<LevelId>,
}

impl VisitedLevels {
    pub fn mark(&mut self, level: LevelId) {
        if level.level_type == LevelType::Dungeon {
            self.set.insert(level);
        }
    }

    pub fn contains(&self, level: &LevelId) -> bool {
        self.set.contains(level)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelId> {
        self.set.iter()
    }

    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.set.len() as u32)?;
        for level in &self.set {
            level.write(w)?;
        }
        Ok(())
    }

    pub fn read(r: &mut Reader) -> SaveResult<VisitedLevels> {
        let count = r.read_u32()? as usize;
        let mut set = BTreeSet::new();
        for _ in 0..count {
            set.insert(LevelId::read(r)?);
        }
        Ok(VisitedLevels { set })
    }
}

// ============================================================
// Sidecar trackers (each owns one auxiliary file)
// ============================================================

/// Where the player has piled loot: level suffix code to stash count.
#[derive(Default)]
pub struct StashTracker {
    pub stashes: BTreeMap<String, u32>,
}

impl StashTracker {
    pub fn save(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.stashes.len() as u32)?;
        for (place, count) in &self.stashes {
            w.write_string(place)?;
            w.write_u32(*count)?;
        }
        Ok(())
    }

    pub fn load(r: &mut Reader) -> SaveResult<StashTracker> {
        let count = r.read_u32()? as usize;
        let mut stashes = BTreeMap::new();
        for _ in 0..count {
            let place = r.read_string()?;
            stashes.insert(place, r.read_u32()?);
        }
        Ok(StashTracker { stashes })
    }
}

/// Persistent interpreter globals. Only written out when scripting is
/// switched on for this game.
#[derive(Default)]
pub struct ScriptState {
    pub enabled: bool,
    pub globals: BTreeMap<String, String>,
}

impl ScriptState {
    pub fn save(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.globals.len() as u32)?;
        for (name, value) in &self.globals {
            w.write_string(name)?;
            w.write_string(value)?;
        }
        Ok(())
    }

    pub fn load(r: &mut Reader) -> SaveResult<ScriptState> {
        let count = r.read_u32()? as usize;
        let mut globals = BTreeMap::new();
        for _ in 0..count {
            let name = r.read_string()?;
            globals.insert(name, r.read_string()?);
        }
        Ok(ScriptState {
            enabled: true,
            globals,
        })
    }
}

#[derive(Default)]
pub struct KillTracker {
    pub kills: BTreeMap<u8, u32>,
}

impl KillTracker {
    pub fn record(&mut self, kind: MonsterKind) {
        *self.kills.entry(kind.to_u8()).or_insert(0) += 1;
    }

    pub fn save(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.kills.len() as u32)?;
        for (kind, count) in &self.kills {
            w.write_u8(*kind)?;
            w.write_u32(*count)?;
        }
        Ok(())
    }

    pub fn load(r: &mut Reader) -> SaveResult<KillTracker> {
        let count = r.read_u32()? as usize;
        let mut kills = BTreeMap::new();
        for _ in 0..count {
            let kind = r.read_u8()?;
            kills.insert(kind, r.read_u32()?);
        }
        Ok(KillTracker { kills })
    }
}

#[derive(Default)]
pub struct TravelCache {
    pub waypoints: Vec<(LevelId, Coord)>,
}

impl TravelCache {
    pub fn save(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.waypoints.len() as u32)?;
        for (level, pos) in &self.waypoints {
            level.write(w)?;
            pos.write(w)?;
        }
        Ok(())
    }

    pub fn load(r: &mut Reader) -> SaveResult<TravelCache> {
        let count = r.read_u32()? as usize;
        let mut waypoints = Vec::with_capacity(count);
        for _ in 0..count {
            let level = LevelId::read(r)?;
            waypoints.push((level, Coord::read(r)?));
        }
        Ok(TravelCache { waypoints })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub turn: u32,
    pub text: String,
}

#[derive(Default)]
pub struct Notes {
    pub entries: Vec<Note>,
}

impl Notes {
    pub fn add(&mut self, turn: u32, text: &str) {
        self.entries.push(Note {
            turn,
            text: text.to_string(),
        });
    }

    pub fn save(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.entries.len() as u32)?;
        for note in &self.entries {
            w.write_u32(note.turn)?;
            w.write_string(&note.text)?;
        }
        Ok(())
    }

    pub fn load(r: &mut Reader) -> SaveResult<Notes> {
        let count = r.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let turn = r.read_u32()?;
            entries.push(Note {
                turn,
                text: r.read_string()?,
            });
        }
        Ok(Notes { entries })
    }
}

#[derive(Default)]
pub struct Tutorial {
    pub enabled: bool,
    pub messages_seen: u32,
}

impl Tutorial {
    pub fn save(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_bool(self.enabled)?;
        w.write_u32(self.messages_seen)
    }

    pub fn load(r: &mut Reader) -> SaveResult<Tutorial> {
        Ok(Tutorial {
            enabled: r.read_bool()?,
            messages_seen: r.read_u32()?,
        })
    }
}

// ============================================================
// Level events
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelEvent {
    EnteringLevel,
    EnteredLevel,
}

/// Per-level event listeners. Cleared at the start of every transition so
/// stale hooks from the previous level never fire against the new one.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Vec<Box<dyn FnMut(LevelEvent) + Send>>,
}

impl EventDispatcher {
    pub fn subscribe(&mut self, f: impl FnMut(LevelEvent) + Send + 'static) {
        self.listeners.push(Box::new(f));
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn fire(&mut self, event: LevelEvent) {
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
    }
}

// ============================================================
// Level generation hook
// ============================================================

pub type LevelBuilderFn = fn(&LevelId, &mut LevelEnv, &mut StdRng);
pub type MonsterAiFn = fn(&mut LevelEnv, &mut StdRng);

/// Default generator: rectangular floor with a rock border, the full stair
/// complement, and whatever exit features the level type demands.
pub fn basic_builder(level: &LevelId, env: &mut LevelEnv, rng: &mut StdRng) {
    for y in 1..GYM as i32 - 1 {
        for x in 1..GXM as i32 - 1 {
            env.set(Coord::new(x, y), Feature::Floor);
        }
    }

    let place = |env: &mut LevelEnv, rng: &mut StdRng, feat: Feature| {
        loop {
            let pos = Coord::new(
                rng.gen_range(1..GXM as i32 - 1),
                rng.gen_range(1..GYM as i32 - 1),
            );
            if env.at(pos) == Feature::Floor {
                env.set(pos, feat);
                return;
            }
        }
    };

    for feat in [
        Feature::StoneStairsUpI,
        Feature::StoneStairsUpII,
        Feature::StoneStairsUpIII,
        Feature::StoneStairsDownI,
        Feature::StoneStairsDownII,
        Feature::StoneStairsDownIII,
    ] {
        place(env, rng, feat);
    }

    match level.level_type {
        LevelType::Abyss => place(env, rng, Feature::ExitAbyss),
        LevelType::Pandemonium => {
            place(env, rng, Feature::ExitPandemonium);
            place(env, rng, Feature::TransitPandemonium);
        }
        LevelType::PortalVault => place(env, rng, Feature::ExitPortalVault),
        LevelType::Labyrinth | LevelType::Dungeon => {}
    }
}

/// Default per-arrival monster activity: clouds burn down one notch.
pub fn basic_monster_tick(env: &mut LevelEnv, _rng: &mut StdRng) {
    for cloud in env.clouds.iter_mut() {
        cloud.decay -= 1;
    }
    env.clouds.retain(|c| c.decay > 0);
}

// ============================================================
// The session
// ============================================================

pub struct GameSession {
    pub you: Player,
    pub env: LevelEnv,
    pub visited: VisitedLevels,

    /// Friendlies in transit, keyed by destination level.
    pub followers: BTreeMap<LevelId, Vec<Follower>>,
    /// Monsters sent ahead (banishment, abyss exits), keyed by destination.
    pub transit_monsters: BTreeMap<LevelId, Vec<Monster>>,
    /// Items sent ahead of the player, keyed by destination.
    pub transit_items: BTreeMap<LevelId, Vec<Item>>,

    pub ghosts: Vec<GhostRecord>,

    pub stash_tracker: StashTracker,
    pub script_state: ScriptState,
    pub kill_tracker: KillTracker,
    pub travel_cache: TravelCache,
    pub notes: Notes,
    pub tutorial: Tutorial,

    pub events: EventDispatcher,
    pub builder: LevelBuilderFn,
    pub monster_ai: MonsterAiFn,

    pub config: SaveConfig,
    pub rng: StdRng,

    /// Set while save_game runs, so hooks don't recurse into saving.
    pub saving_game: bool,
}

impl GameSession {
    pub fn new(config: SaveConfig) -> GameSession {
        GameSession {
            you: Player::default(),
            env: LevelEnv::default(),
            visited: VisitedLevels::default(),
            followers: BTreeMap::new(),
            transit_monsters: BTreeMap::new(),
            transit_items: BTreeMap::new(),
            ghosts: Vec::new(),
            stash_tracker: StashTracker::default(),
            script_state: ScriptState::default(),
            kill_tracker: KillTracker::default(),
            travel_cache: TravelCache::default(),
            notes: Notes::default(),
            tutorial: Tutorial::default(),
            events: EventDispatcher::default(),
            builder: basic_builder,
            monster_ai: basic_monster_tick,
            config,
            rng: StdRng::seed_from_u64(0x6f75626c),
            saving_game: false,
        }
    }

    pub fn one_chance_in(&mut self, n: u32) -> bool {
        n > 0 && self.rng.gen_range(0..n) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_link_items_chains_shared_cells() {
        let mut env = LevelEnv::default();
        let cell = Coord::new(5, 5);
        env.items.push(Item::floor(ItemKind::Weapon, cell));
        env.items.push(Item::floor(ItemKind::Gold, Coord::new(9, 9)));
        env.items.push(Item::floor(ItemKind::Potion, cell));
        env.items.push(Item::held(ItemKind::Scroll));

        env.link_items();

        assert_eq!(env.items[0].link, Some(2));
        assert_eq!(env.items[2].link, None);
        assert_eq!(env.items[1].link, None);
        assert_eq!(env.items[3].link, None);
    }

    #[test]
    fn test_fix_item_coordinates_clears_carried_positions() {
        let mut env = LevelEnv::default();
        env.items.push(Item::floor(ItemKind::Weapon, Coord::new(3, 3)));
        let mut m = Monster::new(MonsterKind::Goblin, Coord::new(3, 3), 5);
        m.items.push(0);
        env.monsters.push(m);

        env.fix_item_coordinates();
        assert_eq!(env.items[0].pos, None);
    }

    #[test]
    fn test_visited_levels_track_only_dungeon() {
        let mut visited = VisitedLevels::default();
        visited.mark(LevelId::dungeon(Branch::Main, 2));
        visited.mark(LevelId {
            branch: Branch::Main,
            depth: 1,
            level_type: LevelType::Abyss,
        });

        assert!(visited.contains(&LevelId::dungeon(Branch::Main, 2)));
        assert_eq!(visited.iter().count(), 1);
    }

    #[test]
    fn test_basic_builder_places_all_stairs() {
        let mut env = LevelEnv::default();
        let mut rng = StdRng::seed_from_u64(7);
        basic_builder(&LevelId::dungeon(Branch::Main, 1), &mut env, &mut rng);

        for feat in [
            Feature::StoneStairsUpI,
            Feature::StoneStairsDownI,
            Feature::StoneStairsDownIII,
        ] {
            assert!(env.find_feature(feat, Coord::new(1, 1)).is_some());
        }
    }

    #[test]
    fn test_tracker_round_trips() {
        let mut stash = StashTracker::default();
        stash.stashes.insert("03o".to_string(), 4);
        let mut notes = Notes::default();
        notes.add(120, "Found a glowing sword");

        let mut buf = Vec::new();
        stash.save(&mut Writer::new(&mut buf)).unwrap();
        notes.save(&mut Writer::new(&mut buf)).unwrap();

        let mut cur = Cursor::new(buf);
        let mut r = Reader::new(&mut cur);
        let stash2 = StashTracker::load(&mut r).unwrap();
        let notes2 = Notes::load(&mut r).unwrap();
        assert_eq!(stash2.stashes.get("03o"), Some(&4));
        assert_eq!(notes2.entries, notes.entries);
    }

    #[test]
    fn test_event_dispatcher_clear_drops_listeners() {
        use std::sync::{Arc, Mutex};
        let mut events = EventDispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        events.subscribe(move |e| log2.lock().unwrap().push(e));

        events.fire(LevelEvent::EnteringLevel);
        events.clear();
        events.fire(LevelEvent::EnteredLevel);

        assert_eq!(*log.lock().unwrap(), vec![LevelEvent::EnteringLevel]);
    }
}
